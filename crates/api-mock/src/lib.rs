//! In-memory implementation of the upstream API for tests.
//!
//! A [`MockCluster`] holds the logical cluster state (one response per
//! request path) and any number of [`MockEndpoint`]s serve it, mirroring how
//! every member of a real cluster answers with the same view. Failures can
//! be injected per path (all endpoints) or per endpoint (unreachable).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod fixtures;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use proxmox_exporter_api::{ApiClient, Error, GuestKind, Operation, Result};
use serde_json::Value;

#[derive(Debug, Default)]
struct ClusterState {
    responses: HashMap<String, Value>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    requests: HashMap<String, usize>,
    latency: Option<Duration>,
}

/// Shared logical state served by every [`MockEndpoint`] of a cluster.
#[derive(Clone, Debug, Default)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    /// Creates an empty cluster. Unconfigured paths answer HTTP 404.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an endpoint serving this cluster.
    #[must_use]
    pub fn endpoint(&self, hostname: &str) -> MockEndpoint {
        MockEndpoint {
            cluster: self.clone(),
            hostname: hostname.to_string(),
            reachable: Arc::new(AtomicBool::new(true)),
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the `data` payload returned for `operation`.
    pub fn set_response(&self, operation: &Operation, data: Value) {
        self.state.lock().responses.insert(operation.path(), data);
    }

    /// Makes every endpoint answer `operation` with HTTP 500.
    pub fn fail(&self, operation: &Operation) {
        self.state.lock().failing.insert(operation.path());
    }

    /// Makes every endpoint never answer `operation`.
    pub fn hang(&self, operation: &Operation) {
        self.state.lock().hanging.insert(operation.path());
    }

    /// Clears any failure or hang injected for `operation`.
    pub fn restore(&self, operation: &Operation) {
        let mut state = self.state.lock();
        let path = operation.path();
        state.failing.remove(&path);
        state.hanging.remove(&path);
    }

    /// Delays every answer by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Number of requests for `operation` that reached any endpoint.
    #[must_use]
    pub fn request_count(&self, operation: &Operation) -> usize {
        self.state
            .lock()
            .requests
            .get(&operation.path())
            .copied()
            .unwrap_or(0)
    }

    /// Total number of requests that reached any endpoint.
    #[must_use]
    pub fn total_requests(&self) -> usize {
        self.state.lock().requests.values().sum()
    }

    /// Sets the node list.
    pub fn with_nodes(&self, nodes: &[(&str, &str)]) -> &Self {
        let data = nodes
            .iter()
            .map(|(name, status)| fixtures::node(name, status))
            .collect();
        self.set_response(&Operation::Nodes, Value::Array(data));
        self
    }

    /// Sets the status response of `node`.
    pub fn with_node_status(&self, node: &str, cpus: u64, memory: u64, version: &str) -> &Self {
        self.set_response(
            &Operation::NodeStatus {
                node: node.to_string(),
            },
            fixtures::node_status(cpus, memory, version),
        );
        self
    }

    /// Sets the guest listing of `kind` on `node`.
    pub fn with_guests(&self, node: &str, kind: GuestKind, guests: Vec<Value>) -> &Self {
        self.set_response(
            &Operation::NodeGuests {
                node: node.to_string(),
                kind,
            },
            Value::Array(guests),
        );
        self
    }

    /// Sets the storage listing of `node`.
    pub fn with_storage(&self, node: &str, storage: Vec<Value>) -> &Self {
        self.set_response(
            &Operation::NodeStorage {
                node: node.to_string(),
            },
            Value::Array(storage),
        );
        self
    }

    /// Sets the disk listing of `node`.
    pub fn with_disks(&self, node: &str, disks: Vec<Value>) -> &Self {
        self.set_response(
            &Operation::NodeDisks {
                node: node.to_string(),
            },
            Value::Array(disks),
        );
        self
    }

    /// Sets the certificate listing of `node`.
    pub fn with_certificates(&self, node: &str, certificates: Vec<Value>) -> &Self {
        self.set_response(
            &Operation::NodeCertificates {
                node: node.to_string(),
            },
            Value::Array(certificates),
        );
        self
    }

    /// Gives `node` empty guest, storage, disk and certificate listings and
    /// the given status.
    pub fn with_empty_node(&self, node: &str, cpus: u64, memory: u64) -> &Self {
        self.with_node_status(node, cpus, memory, "pve-manager/8.2.4/faa83925c9641325")
            .with_guests(node, GuestKind::Qemu, vec![])
            .with_guests(node, GuestKind::Lxc, vec![])
            .with_storage(node, vec![])
            .with_disks(node, vec![])
            .with_certificates(node, vec![])
    }

    async fn serve(&self, hostname: &str, operation: &Operation) -> Result<Value> {
        let path = operation.path();
        let (latency, hanging) = {
            let mut state = self.state.lock();
            *state.requests.entry(path.clone()).or_default() += 1;
            (state.latency, state.hanging.contains(&path))
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if hanging {
            std::future::pending::<()>().await;
        }

        let state = self.state.lock();
        if state.failing.contains(&path) {
            return Err(Error::Status {
                operation: operation.name(),
                status: 500,
                body: format!("mock failure on {hostname}"),
            });
        }

        state
            .responses
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::Status {
                operation: operation.name(),
                status: 404,
                body: format!("no mock response for {path}"),
            })
    }
}

/// One endpoint of a [`MockCluster`].
#[derive(Clone, Debug)]
pub struct MockEndpoint {
    cluster: MockCluster,
    hostname: String,
    reachable: Arc<AtomicBool>,
    requests: Arc<AtomicUsize>,
}

impl MockEndpoint {
    /// Makes this endpoint fail (or stop failing) every request.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of requests this endpoint received, including failed ones.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiClient for MockEndpoint {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn get(&self, operation: &Operation) -> Result<Value> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Error::Unreachable(self.hostname.clone()));
        }

        self.cluster.serve(&self.hostname, operation).await
    }
}
