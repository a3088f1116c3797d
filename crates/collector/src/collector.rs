use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use proxmox_exporter_api::{ApiClient, HttpClient, NodeListEntry, Operation};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::metrics::ScrapeMetrics;
use crate::node::{KnownCertificates, PerNodeResult, Scrape};
use crate::{ClusterContext, Error, Result};

/// Default time budget for one scrape.
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(25);

/// Source of the current time, used for certificate expiry.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Configuration for the collector
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    /// Upstream calls still outstanding after this long are cancelled
    pub scrape_timeout: Duration,

    /// Maximum number of nodes collected at once; 0 means unbounded
    pub max_concurrent_nodes: usize,

    /// Whether to emit `guest_snapshots_count`
    pub enable_snapshot_metrics: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            scrape_timeout: DEFAULT_SCRAPE_TIMEOUT,
            max_concurrent_nodes: 0,
            enable_snapshot_metrics: false,
        }
    }
}

/// Field-wise sum of the per-node results of one scrape.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClusterAggregate {
    /// Logical CPUs across nodes.
    pub cpus_total: u64,
    /// vCPUs configured on guests across nodes.
    pub cpus_allocated: u64,
    /// Memory across nodes in bytes.
    pub memory_total: u64,
    /// Memory configured on guests across nodes in bytes.
    pub memory_allocated: u64,
}

impl ClusterAggregate {
    /// Adds one node's contribution.
    pub fn add(&mut self, result: &PerNodeResult) {
        self.cpus_total = self.cpus_total.saturating_add(result.cpus_total);
        self.cpus_allocated = self.cpus_allocated.saturating_add(result.cpus_allocated);
        self.memory_total = self.memory_total.saturating_add(result.memory_total);
        self.memory_allocated = self
            .memory_allocated
            .saturating_add(result.memory_allocated);
    }
}

impl FromIterator<PerNodeResult> for ClusterAggregate {
    fn from_iter<I: IntoIterator<Item = PerNodeResult>>(iter: I) -> Self {
        let mut aggregate = Self::default();
        for result in iter {
            aggregate.add(&result);
        }
        aggregate
    }
}

/// Runs scrapes against one cluster.
pub struct Collector<C = HttpClient>
where
    C: ApiClient,
{
    context: Arc<ClusterContext<C>>,
    config: CollectorConfig,
    clock: Clock,
    certificates: KnownCertificates,
}

impl<C> Collector<C>
where
    C: ApiClient,
{
    /// Create a new collector
    #[must_use]
    pub fn new(context: Arc<ClusterContext<C>>, config: CollectorConfig) -> Self {
        Self {
            context,
            config,
            clock: Arc::new(Utc::now),
            certificates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replaces the wall clock used for certificate expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The shared cluster context.
    #[must_use]
    pub const fn context(&self) -> &Arc<ClusterContext<C>> {
        &self.context
    }

    /// Runs one scrape to completion and renders it in the Prometheus text
    /// format.
    ///
    /// Failures of individual queries only drop the affected series. The
    /// scrape as a whole fails only when the node list is unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeListing`] if the node list cannot be obtained,
    /// or a metrics error if registration or encoding fails.
    pub async fn collect(&self) -> Result<String> {
        let cancel = CancellationToken::new();
        let scrape = self.scrape(cancel.clone());
        tokio::pin!(scrape);

        let scrape_timeout = self.config.scrape_timeout;
        let metrics = tokio::select! {
            result = &mut scrape => result?,
            () = tokio::time::sleep(scrape_timeout) => {
                warn!(
                    "Scrape exceeded {:?}, cancelling outstanding requests",
                    scrape_timeout
                );
                cancel.cancel();
                scrape.await?
            }
        };

        metrics.encode()
    }

    async fn scrape(&self, cancel: CancellationToken) -> Result<ScrapeMetrics> {
        let nodes: Vec<NodeListEntry> = self
            .context
            .fetch(&Operation::Nodes, &cancel)
            .await
            .map_err(|e| Error::NodeListing(Box::new(e)))?;

        let cluster_name = self.context.cluster_name();
        let metrics = ScrapeMetrics::new(
            cluster_name.as_deref(),
            self.config.enable_snapshot_metrics,
        )?;
        let templates = self.context.template_ids(&cancel).await;

        debug!(
            "Collecting {} node(s), excluding {} template(s)",
            nodes.len(),
            templates.len()
        );

        let scrape = Arc::new(Scrape {
            context: Arc::clone(&self.context),
            metrics,
            templates,
            cancel,
            now: (self.clock)(),
            certificates: Arc::clone(&self.certificates),
        });

        let aggregate = self.fan_out(&scrape, nodes).await;

        scrape.metrics.set_cluster_totals(&aggregate);

        Ok(scrape.metrics.clone())
    }

    /// Spawns one task per node, waits for all of them and reduces their
    /// results.
    async fn fan_out(&self, scrape: &Arc<Scrape<C>>, nodes: Vec<NodeListEntry>) -> ClusterAggregate {
        let limit = match self.config.max_concurrent_nodes {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        for node in nodes {
            let scrape = Arc::clone(scrape);
            let limit = limit.clone();
            let results_tx = results_tx.clone();

            tasks.spawn(
                async move {
                    let _permit = match limit {
                        Some(limit) => limit.acquire_owned().await.ok(),
                        None => None,
                    };

                    let result = scrape.collect_node(node).await;
                    let _ = results_tx.send(result);
                }
                .instrument(Span::current()),
            );
        }
        drop(results_tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Node collection task failed: {}", e);
            }
        }

        let mut results = Vec::new();
        while let Some(result) = results_rx.recv().await {
            results.push(result);
        }

        let aggregate: ClusterAggregate = results.into_iter().collect();
        info!(
            "Collected cluster totals: {} of {} vCPU and {} of {} bytes allocated",
            aggregate.cpus_allocated,
            aggregate.cpus_total,
            aggregate.memory_allocated,
            aggregate.memory_total
        );

        aggregate
    }
}

impl<C> fmt::Debug for Collector<C>
where
    C: ApiClient,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("context", &self.context)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_saturates() {
        let mut aggregate = ClusterAggregate {
            memory_total: u64::MAX - 1,
            ..ClusterAggregate::default()
        };
        aggregate.add(&PerNodeResult {
            node: "a".to_string(),
            cpus_total: 4,
            memory_total: 1 << 40,
            ..PerNodeResult::default()
        });

        assert_eq!(aggregate.memory_total, u64::MAX);
        assert_eq!(aggregate.cpus_total, 4);
    }

    #[test]
    fn test_aggregate_sums_fields() {
        let aggregate: ClusterAggregate = vec![
            PerNodeResult {
                node: "a".to_string(),
                cpus_total: 8,
                cpus_allocated: 7,
                memory_total: 16_384,
                memory_allocated: 13_312,
            },
            PerNodeResult {
                node: "b".to_string(),
                cpus_total: 4,
                ..PerNodeResult::default()
            },
        ]
        .into_iter()
        .collect();

        assert_eq!(
            aggregate,
            ClusterAggregate {
                cpus_total: 12,
                cpus_allocated: 7,
                memory_total: 16_384,
                memory_allocated: 13_312,
            }
        );
    }
}
