//! Cluster name detection and template lookup.

use std::collections::HashSet;

use proxmox_exporter_api::{ApiClient, ClusterResource, ClusterStatusEntry, Operation};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ClusterContext;

impl<C> ClusterContext<C>
where
    C: ApiClient,
{
    /// Queries the cluster status and records the cluster name, which then
    /// labels every metric as `cluster`.
    ///
    /// Standalone nodes and failed queries leave the name unset. Safe to
    /// call again; a later successful detection replaces the stored name.
    pub async fn detect_cluster_name(&self) -> Option<String> {
        let entries: Vec<ClusterStatusEntry> = match self
            .fetch(&Operation::ClusterStatus, &CancellationToken::new())
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cluster status unavailable, assuming standalone node: {}", e);
                return None;
            }
        };

        let name = entries
            .into_iter()
            .find(|entry| entry.entry_type == "cluster")
            .map(|entry| entry.name)
            .filter(|name| !name.is_empty());

        match &name {
            Some(name) => info!("Detected cluster name {}", name),
            None => debug!("Cluster status has no cluster entry"),
        }

        if name.is_some() {
            self.cluster_name.write().clone_from(&name);
        }

        name
    }

    /// Ids of template guests across the cluster.
    ///
    /// Only queried when a cluster name is known. A failed query excludes
    /// nothing.
    pub async fn template_ids(&self, cancel: &CancellationToken) -> HashSet<u64> {
        if self.cluster_name.read().is_none() {
            return HashSet::new();
        }

        match self
            .fetch::<Vec<ClusterResource>>(&Operation::ClusterResources, cancel)
            .await
        {
            Ok(resources) => resources
                .into_iter()
                .filter(|resource| resource.template)
                .filter_map(|resource| resource.vmid)
                .collect(),
            Err(e) => {
                debug!("Ignoring cluster resources error, templates will not be excluded: {}", e);
                HashSet::new()
            }
        }
    }
}
