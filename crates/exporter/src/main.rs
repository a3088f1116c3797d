//! Prometheus exporter for Proxmox VE clusters.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod server;

use error::{Error, Result};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use proxmox_exporter_cache::{CacheConfig, ResponseCache};
use proxmox_exporter_collector::{ClusterContext, Collector, CollectorConfig};
use proxmox_exporter_pool::{EndpointPool, PoolConfig};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// One of debug, info, warn or error
    #[arg(long, env = "PROXMOX_EXPORTER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "PROXMOX_EXPORTER_SERVER_ADDR", default_value = "0.0.0.0")]
    server_addr: IpAddr,

    #[arg(long, env = "PROXMOX_EXPORTER_SERVER_PORT", default_value_t = 8080)]
    server_port: u16,

    /// Comma separated Proxmox API URLs, e.g. https://pve1:8006
    #[arg(long, env = "PROXMOX_EXPORTER_PROXMOX_ENDPOINTS", required = true)]
    proxmox_endpoints: String,

    /// API token id, e.g. exporter@pve!metrics
    #[arg(long, env = "PROXMOX_EXPORTER_PROXMOX_TOKEN_ID", required = true)]
    proxmox_token_id: String,

    #[arg(
        long,
        env = "PROXMOX_EXPORTER_PROXMOX_TOKEN",
        required = true,
        hide_env_values = true
    )]
    proxmox_token: String,

    /// Accept invalid TLS certificates from the Proxmox API
    #[arg(long, env = "PROXMOX_EXPORTER_PROXMOX_API_INSECURE", default_value_t = false)]
    proxmox_api_insecure: bool,

    /// Seconds an upstream response stays cached
    #[arg(long, env = "PROXMOX_EXPORTER_CACHE_TTL", default_value_t = 24)]
    cache_ttl: u64,

    #[arg(long, env = "PROXMOX_EXPORTER_CACHE_SWEEP_INTERVAL", default_value_t = 5)]
    cache_sweep_interval: u64,

    /// Seconds a failing endpoint is excluded before it is retried
    #[arg(long, env = "PROXMOX_EXPORTER_BAN_DURATION", default_value_t = 60)]
    ban_duration: u64,

    #[arg(long, env = "PROXMOX_EXPORTER_RECOVERY_INTERVAL", default_value_t = 5)]
    recovery_interval: u64,

    #[arg(long, env = "PROXMOX_EXPORTER_REQUEST_TIMEOUT", default_value_t = 10)]
    request_timeout: u64,

    /// Seconds after which outstanding upstream calls of a scrape are cancelled
    #[arg(long, env = "PROXMOX_EXPORTER_SCRAPE_TIMEOUT", default_value_t = 25)]
    scrape_timeout: u64,

    /// Nodes collected at once; 0 means unbounded
    #[arg(long, env = "PROXMOX_EXPORTER_MAX_CONCURRENT_NODES", default_value_t = 0)]
    max_concurrent_nodes: usize,

    #[arg(long, env = "PROXMOX_EXPORTER_ENABLE_SNAPSHOT_METRICS", default_value_t = false)]
    enable_snapshot_metrics: bool,
}

/// Maps a `--log-level` value to a tracing level, `None` if unrecognised.
fn parse_log_level(level: &str) -> Option<Level> {
    match level.to_ascii_lowercase().as_str() {
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn split_endpoints(endpoints: &str) -> Vec<&str> {
    endpoints
        .split(',')
        .map(str::trim)
        .filter(|endpoint| !endpoint.is_empty())
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = parse_log_level(&args.log_level);
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(level.unwrap_or(Level::INFO))
            .finish(),
    )?;
    if level.is_none() {
        warn!("Unknown log level {:?}, using info", args.log_level);
    }

    let pool = EndpointPool::connect(
        &split_endpoints(&args.proxmox_endpoints),
        &args.proxmox_token_id,
        &args.proxmox_token,
        args.proxmox_api_insecure,
        PoolConfig {
            ban_duration: Duration::from_secs(args.ban_duration),
            recovery_interval: Duration::from_secs(args.recovery_interval),
            request_timeout: Duration::from_secs(args.request_timeout),
        },
    )?;
    pool.initialize().await?;

    let cache = ResponseCache::new(CacheConfig {
        ttl: Duration::from_secs(args.cache_ttl),
        sweep_interval: Duration::from_secs(args.cache_sweep_interval),
    });

    let context = Arc::new(ClusterContext::new(pool, cache));
    match context.detect_cluster_name().await {
        Some(name) => info!("Exporting metrics for cluster {}", name),
        None => info!("No cluster detected, metrics carry no cluster label"),
    }

    context.cache().start()?;
    context.pool().start()?;

    let collector = Arc::new(Collector::new(
        Arc::clone(&context),
        CollectorConfig {
            scrape_timeout: Duration::from_secs(args.scrape_timeout),
            max_concurrent_nodes: args.max_concurrent_nodes,
            enable_snapshot_metrics: args.enable_snapshot_metrics,
        },
    ));

    let addr = SocketAddr::new(args.server_addr, args.server_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })?;
    info!("Listening on {}", addr);

    let served = axum::serve(listener, server::router(collector))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
            }
            info!("shutting down...");
        })
        .await
        .map_err(Error::Serve);

    context.pool().shutdown().await;
    context.cache().shutdown().await;
    info!("exporter shutdown cleanly. goodbye.");

    served
}
