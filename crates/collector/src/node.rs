//! Collection of one node's metrics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use proxmox_exporter_api::{
    ApiClient, CertificateInfo, DiskEntry, GuestEntry, GuestKind, NodeListEntry, NodeStatus,
    Operation, Snapshot, StorageEntry,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::ClusterContext;
use crate::metrics::ScrapeMetrics;

const SECONDS_PER_DAY: i64 = 86_400;
const UNKNOWN_SUBJECT: &str = "unknown";
const CURRENT_SNAPSHOT: &str = "current";

/// Certificate subjects last seen per node, used to report failed
/// certificate queries against the right series.
pub(crate) type KnownCertificates = Arc<Mutex<HashMap<String, Vec<String>>>>;

/// Capacity and allocation reported by one node task.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PerNodeResult {
    /// Node name.
    pub node: String,
    /// Logical CPUs of the node.
    pub cpus_total: u64,
    /// vCPUs configured on the node's guests.
    pub cpus_allocated: u64,
    /// Memory of the node in bytes.
    pub memory_total: u64,
    /// Memory configured on the node's guests in bytes.
    pub memory_allocated: u64,
}

/// Everything a node task needs from its scrape.
pub(crate) struct Scrape<C>
where
    C: ApiClient,
{
    pub context: Arc<ClusterContext<C>>,
    pub metrics: ScrapeMetrics,
    pub templates: HashSet<u64>,
    pub cancel: CancellationToken,
    pub now: DateTime<Utc>,
    pub certificates: KnownCertificates,
}

#[derive(Default)]
struct Allocation {
    cpus: u64,
    memory: u64,
}

struct Capacity {
    cpus: u64,
    memory: u64,
}

/// Whole days from `now` until the unix timestamp `not_after`, rounded down.
#[must_use]
pub fn days_until(not_after: i64, now: DateTime<Utc>) -> i64 {
    (not_after - now.timestamp()).div_euclid(SECONDS_PER_DAY)
}

fn gauge_flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn gauge_value(value: u64) -> f64 {
    value as f64
}

#[allow(clippy::cast_precision_loss)]
fn gauge_days(days: i64) -> f64 {
    days as f64
}

impl<C> Scrape<C>
where
    C: ApiClient,
{
    /// Collects every metric of `node` and returns its contribution to the
    /// cluster totals. Offline nodes only get `node_up` and contribute
    /// nothing.
    pub async fn collect_node(&self, node: NodeListEntry) -> PerNodeResult {
        let name = node.node.as_str();
        let online = node.is_online();
        self.metrics
            .node_up
            .with_label_values(&[name])
            .set(gauge_flag(online));

        let mut result = PerNodeResult {
            node: node.node.clone(),
            ..PerNodeResult::default()
        };

        if !online {
            debug!("Node {} is {}, skipping", name, node.status);
            return result;
        }

        let (allocation, capacity, (), (), ()) = tokio::join!(
            self.collect_guests(name),
            self.collect_status(name),
            self.collect_storage(name),
            self.collect_disks(name),
            self.collect_certificates(name),
        );

        if let Some(allocation) = allocation {
            result.cpus_allocated = allocation.cpus;
            result.memory_allocated = allocation.memory;
        }
        if let Some(capacity) = capacity {
            result.cpus_total = capacity.cpus;
            result.memory_total = capacity.memory;
        }

        result
    }

    async fn collect_guests(&self, node: &str) -> Option<Allocation> {
        let (vms, containers) = tokio::join!(
            self.collect_guest_kind(node, GuestKind::Qemu),
            self.collect_guest_kind(node, GuestKind::Lxc),
        );

        let (vms, containers) = (vms?, containers?);
        let allocation = Allocation {
            cpus: vms.cpus.saturating_add(containers.cpus),
            memory: vms.memory.saturating_add(containers.memory),
        };

        self.metrics
            .node_cpus_allocated
            .with_label_values(&[node])
            .set(gauge_value(allocation.cpus));
        self.metrics
            .node_memory_allocated_bytes
            .with_label_values(&[node])
            .set(gauge_value(allocation.memory));

        Some(allocation)
    }

    async fn collect_guest_kind(&self, node: &str, kind: GuestKind) -> Option<Allocation> {
        let operation = Operation::NodeGuests {
            node: node.to_string(),
            kind,
        };
        let guests: Vec<GuestEntry> = match self
            .context
            .fetch(&operation, &self.cancel)
            .await
        {
            Ok(guests) => guests,
            Err(e) => {
                error!("Failed to list {} guests on node {}: {}", kind, node, e);
                return None;
            }
        };

        let mut allocation = Allocation::default();
        let mut counted = Vec::with_capacity(guests.len());
        for guest in guests {
            if guest.template || self.templates.contains(&guest.vmid) {
                debug!(
                    "Excluding {} {} ({}) on node {} because it is a template",
                    kind, guest.vmid, guest.name, node
                );
                continue;
            }

            let vmid = guest.vmid.to_string();
            self.metrics
                .guest_up
                .with_label_values(&[node, kind.as_str(), guest.name.as_str(), vmid.as_str()])
                .set(gauge_flag(guest.is_running()));

            allocation.cpus = allocation.cpus.saturating_add(guest.cpus);
            allocation.memory = allocation.memory.saturating_add(guest.maxmem);
            counted.push(guest);
        }

        if self.metrics.guest_snapshots_count.is_some() {
            join_all(
                counted
                    .iter()
                    .map(|guest| self.collect_snapshots(node, kind, guest)),
            )
            .await;
        }

        Some(allocation)
    }

    async fn collect_snapshots(&self, node: &str, kind: GuestKind, guest: &GuestEntry) {
        let Some(gauge) = &self.metrics.guest_snapshots_count else {
            return;
        };

        let operation = Operation::GuestSnapshots {
            node: node.to_string(),
            kind,
            vmid: guest.vmid,
        };
        match self
            .context
            .fetch::<Vec<Snapshot>>(&operation, &self.cancel)
            .await
        {
            Ok(snapshots) => {
                let count = snapshots
                    .iter()
                    .filter(|snapshot| snapshot.name != CURRENT_SNAPSHOT)
                    .count();
                let vmid = guest.vmid.to_string();
                gauge
                    .with_label_values(&[node, kind.as_str(), guest.name.as_str(), vmid.as_str()])
                    .set(gauge_value(count as u64));
            }
            Err(e) => error!(
                "Failed to list snapshots of {} {} on node {}: {}",
                kind, guest.vmid, node, e
            ),
        }
    }

    async fn collect_status(&self, node: &str) -> Option<Capacity> {
        let operation = Operation::NodeStatus {
            node: node.to_string(),
        };
        let status: NodeStatus = match self.context.fetch(&operation, &self.cancel).await {
            Ok(status) => status,
            Err(e) => {
                error!("Failed to get status of node {}: {}", node, e);
                return None;
            }
        };

        self.metrics
            .node_version
            .with_label_values(&[node, status.pveversion.as_str()])
            .set(1.0);
        self.metrics
            .node_cpus_total
            .with_label_values(&[node])
            .set(gauge_value(status.cpuinfo.cpus));
        self.metrics
            .node_memory_total_bytes
            .with_label_values(&[node])
            .set(gauge_value(status.memory.total));

        Some(Capacity {
            cpus: status.cpuinfo.cpus,
            memory: status.memory.total,
        })
    }

    async fn collect_storage(&self, node: &str) {
        let operation = Operation::NodeStorage {
            node: node.to_string(),
        };
        let storages: Vec<StorageEntry> = match self.context.fetch(&operation, &self.cancel).await
        {
            Ok(storages) => storages,
            Err(e) => {
                error!("Failed to list storage on node {}: {}", node, e);
                return;
            }
        };

        for storage in storages {
            let shared = if storage.shared { "true" } else { "false" };
            let labels = [
                node,
                storage.storage.as_str(),
                storage.storage_type.as_str(),
                shared,
            ];
            self.metrics
                .node_storage_total_bytes
                .with_label_values(&labels)
                .set(gauge_value(storage.total));
            self.metrics
                .node_storage_used_bytes
                .with_label_values(&labels)
                .set(gauge_value(storage.used));
        }
    }

    async fn collect_disks(&self, node: &str) {
        let operation = Operation::NodeDisks {
            node: node.to_string(),
        };
        let disks: Vec<DiskEntry> = match self.context.fetch(&operation, &self.cancel).await {
            Ok(disks) => disks,
            Err(e) => {
                error!("Failed to list disks on node {}: {}", node, e);
                return;
            }
        };

        for disk in disks {
            self.metrics
                .node_disk_smart_status
                .with_label_values(&[node, disk.devpath.as_str()])
                .set(gauge_flag(disk.is_healthy()));
        }
    }

    async fn collect_certificates(&self, node: &str) {
        let operation = Operation::NodeCertificates {
            node: node.to_string(),
        };
        let gauge = &self.metrics.node_days_until_cert_expiration;

        let certificates: Vec<CertificateInfo> =
            match self.context.fetch(&operation, &self.cancel).await {
                Ok(certificates) => certificates,
                Err(e) => {
                    error!("Failed to get certificates of node {}: {}", node, e);
                    let subjects = self
                        .certificates
                        .lock()
                        .get(node)
                        .cloned()
                        .unwrap_or_else(|| vec![UNKNOWN_SUBJECT.to_string()]);
                    for subject in subjects {
                        warn!(
                            "Reporting 0 days until expiry for certificate {} on node {}",
                            subject, node
                        );
                        gauge.with_label_values(&[node, subject.as_str()]).set(0.0);
                    }
                    return;
                }
            };

        let mut subjects = Vec::with_capacity(certificates.len());
        for certificate in certificates {
            let days = match certificate.notafter {
                Some(not_after) => days_until(not_after, self.now),
                None => {
                    warn!(
                        "Certificate {} on node {} has no expiry, reporting 0 days",
                        certificate.subject, node
                    );
                    0
                }
            };

            gauge
                .with_label_values(&[node, certificate.subject.as_str()])
                .set(gauge_days(days));
            subjects.push(certificate.subject);
        }

        self.certificates.lock().insert(node.to_string(), subjects);
    }
}
