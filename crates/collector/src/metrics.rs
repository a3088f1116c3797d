//! Metric families exposed by the exporter.
//!
//! A fresh registry is built for every scrape so series of nodes and guests
//! that disappeared are never carried over.

use std::collections::HashMap;

use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::node::gauge_value;
use crate::{ClusterAggregate, Result};

/// Namespace prepended to every metric name.
pub const NAMESPACE: &str = "proxmox";

/// Per-scrape metric sink. Gauges are safe to set from concurrent tasks.
#[derive(Clone)]
pub(crate) struct ScrapeMetrics {
    registry: Registry,

    pub node_up: GaugeVec,
    pub guest_up: GaugeVec,
    pub node_version: GaugeVec,

    pub cluster_cpus_total: Gauge,
    pub cluster_cpus_allocated: Gauge,
    pub node_cpus_total: GaugeVec,
    pub node_cpus_allocated: GaugeVec,

    pub cluster_memory_total_bytes: Gauge,
    pub cluster_memory_allocated_bytes: Gauge,
    pub node_memory_total_bytes: GaugeVec,
    pub node_memory_allocated_bytes: GaugeVec,

    pub node_storage_total_bytes: GaugeVec,
    pub node_storage_used_bytes: GaugeVec,

    pub node_disk_smart_status: GaugeVec,

    pub node_days_until_cert_expiration: GaugeVec,

    pub guest_snapshots_count: Option<GaugeVec>,
}

struct Families<'a> {
    registry: &'a Registry,
    const_labels: HashMap<String, String>,
}

impl Families<'_> {
    fn opts(&self, name: &str, help: &str) -> Opts {
        Opts::new(name, help)
            .namespace(NAMESPACE)
            .const_labels(self.const_labels.clone())
    }

    fn gauge(&self, name: &str, help: &str) -> prometheus::Result<Gauge> {
        let gauge = Gauge::with_opts(self.opts(name, help))?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    fn gauge_vec(&self, name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
        let gauge = GaugeVec::new(self.opts(name, help), labels)?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }
}

impl ScrapeMetrics {
    pub fn new(cluster_name: Option<&str>, snapshot_metrics: bool) -> Result<Self> {
        let registry = Registry::new();
        let mut const_labels = HashMap::new();
        if let Some(cluster_name) = cluster_name {
            const_labels.insert("cluster".to_string(), cluster_name.to_string());
        }
        let families = Families {
            registry: &registry,
            const_labels,
        };

        let guest_snapshots_count = if snapshot_metrics {
            Some(families.gauge_vec(
                "guest_snapshots_count",
                "Number of snapshots of a VM or LXC, excluding the current state.",
                &["node", "type", "name", "vmid"],
            )?)
        } else {
            None
        };

        Ok(Self {
            node_up: families.gauge_vec(
                "node_up",
                "Shows whether host nodes in a proxmox cluster are up. (0=down,1=up)",
                &["node"],
            )?,
            guest_up: families.gauge_vec(
                "guest_up",
                "Shows whether VMs and LXCs in a proxmox cluster are up. (0=down,1=up)",
                &["node", "type", "name", "vmid"],
            )?,
            node_version: families.gauge_vec(
                "node_version",
                "Shows PVE manager node version information",
                &["node", "version"],
            )?,
            cluster_cpus_total: families.gauge(
                "cluster_cpus_total",
                "Total number of vCPU (cores/threads) for a cluster.",
            )?,
            cluster_cpus_allocated: families.gauge(
                "cluster_cpus_allocated",
                "Total number of vCPU (cores/threads) allocated to guests for a cluster.",
            )?,
            node_cpus_total: families.gauge_vec(
                "node_cpus_total",
                "Total number of vCPU (cores/threads) for a node.",
                &["node"],
            )?,
            node_cpus_allocated: families.gauge_vec(
                "node_cpus_allocated",
                "Total number of vCPU (cores/threads) allocated to guests for a node.",
                &["node"],
            )?,
            cluster_memory_total_bytes: families.gauge(
                "cluster_memory_total_bytes",
                "Total amount of memory in bytes for a cluster.",
            )?,
            cluster_memory_allocated_bytes: families.gauge(
                "cluster_memory_allocated_bytes",
                "Total amount of memory allocated in bytes to guests for a cluster.",
            )?,
            node_memory_total_bytes: families.gauge_vec(
                "node_memory_total_bytes",
                "Total amount of memory in bytes for a node.",
                &["node"],
            )?,
            node_memory_allocated_bytes: families.gauge_vec(
                "node_memory_allocated_bytes",
                "Total amount of memory allocated in bytes to guests for a node.",
                &["node"],
            )?,
            node_storage_total_bytes: families.gauge_vec(
                "node_storage_total_bytes",
                "Total amount of storage available in a volume on a node by storage type.",
                &["node", "storage", "type", "shared"],
            )?,
            node_storage_used_bytes: families.gauge_vec(
                "node_storage_used_bytes",
                "Total amount of storage used in a volume on a node by storage type.",
                &["node", "storage", "type", "shared"],
            )?,
            node_disk_smart_status: families.gauge_vec(
                "node_disk_smart_status",
                "Disk SMART health status. (0=FAIL/Unknown,1=PASSED)",
                &["node", "devpath"],
            )?,
            node_days_until_cert_expiration: families.gauge_vec(
                "node_days_until_cert_expiration",
                "Number of days until a certificate in PVE expires. Can report 0 days on metric collection errors, check exporter logs.",
                &["node", "subject"],
            )?,
            guest_snapshots_count,
            registry,
        })
    }

    pub fn set_cluster_totals(&self, aggregate: &ClusterAggregate) {
        self.cluster_cpus_total.set(gauge_value(aggregate.cpus_total));
        self.cluster_cpus_allocated
            .set(gauge_value(aggregate.cpus_allocated));
        self.cluster_memory_total_bytes
            .set(gauge_value(aggregate.memory_total));
        self.cluster_memory_allocated_bytes
            .set(gauge_value(aggregate.memory_allocated));
    }

    /// Renders every family in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
