//! Per-scrape collection of Proxmox VE cluster metrics.
//!
//! A [`Collector`] lists the cluster's nodes, collects every online node
//! concurrently through the shared [`ClusterContext`] and reduces the
//! per-node results into cluster-wide totals. Failures of individual queries
//! only drop the affected series; only a failed node listing fails a scrape.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod collector;
mod context;
mod error;
mod metrics;
mod node;
mod topology;

pub use collector::{Clock, ClusterAggregate, Collector, CollectorConfig, DEFAULT_SCRAPE_TIMEOUT};
pub use context::{ClusterContext, PayloadCache};
pub use error::{Error, Result};
pub use metrics::NAMESPACE;
pub use node::{PerNodeResult, days_until};
