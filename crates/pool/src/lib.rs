//! Pool of redundant upstream API endpoints with failure-driven exclusion.
//!
//! Requests are spread round-robin over the endpoints that are currently
//! active. An endpoint that fails a request is excluded for a cool-down and
//! the request moves on to the next one. Error responses that concern the
//! requested resource rather than the endpoint are retried elsewhere without
//! excluding anyone. A background task rechecks excluded
//! endpoints once their cool-down has elapsed and reactivates those that
//! answer.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::{Error, Result};

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use proxmox_exporter_api::{
    ApiClient, ApiToken, DEFAULT_REQUEST_TIMEOUT, HttpClient, HttpClientOptions, Operation,
    Version,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default time an endpoint stays excluded after a failure.
pub const DEFAULT_BAN_DURATION: Duration = Duration::from_secs(60);

/// Default interval between recovery passes.
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for the endpoint pool
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// How long a failing endpoint is excluded before it is retried
    pub ban_duration: Duration,

    /// Interval at which excluded endpoints are checked for recovery
    pub recovery_interval: Duration,

    /// Per-request timeout for endpoints built by [`EndpointPool::connect`]
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ban_duration: DEFAULT_BAN_DURATION,
            recovery_interval: DEFAULT_RECOVERY_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Availability of one endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndpointState {
    /// Eligible for selection.
    Active,

    /// Not selected until a recovery check succeeds.
    Excluded {
        /// Earliest time the endpoint is checked again.
        until: Instant,
    },
}

/// Point-in-time view of one endpoint.
#[derive(Clone, Debug)]
pub struct EndpointStatus {
    /// Host name of the endpoint.
    pub hostname: String,

    /// Current availability.
    pub state: EndpointState,
}

impl EndpointStatus {
    /// Whether the endpoint is eligible for selection.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, EndpointState::Active)
    }
}

struct PoolState {
    excluded_until: Vec<Option<Instant>>,
    cursor: usize,
}

#[derive(Default)]
struct RecoveryState {
    recovery_task: Option<JoinHandle<()>>,
    shutdown_token: Option<CancellationToken>,
}

struct Inner<C> {
    clients: Vec<Arc<C>>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    recovery: Mutex<RecoveryState>,
}

/// Redundant endpoints of one cluster.
///
/// Cloning is cheap; clones share endpoint state.
pub struct EndpointPool<C = HttpClient>
where
    C: ApiClient,
{
    inner: Arc<Inner<C>>,
}

impl<C> Clone for EndpointPool<C>
where
    C: ApiClient,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl EndpointPool<HttpClient> {
    /// Builds a pool of HTTP endpoints, one per URL, all authenticating with
    /// the same API token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `urls` is empty or any URL is
    /// malformed or has no host.
    pub fn connect<S>(
        urls: &[S],
        token_id: &str,
        token_secret: &str,
        insecure_tls: bool,
        config: PoolConfig,
    ) -> Result<Self>
    where
        S: AsRef<str>,
    {
        let token = ApiToken::new(token_id, token_secret);
        let options = HttpClientOptions {
            insecure_tls,
            request_timeout: config.request_timeout,
        };

        let clients = urls
            .iter()
            .map(|url| {
                HttpClient::new(url.as_ref(), &token, &options)
                    .map_err(|e| Error::Configuration(format!("{}: {e}", url.as_ref())))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(clients, config)
    }
}

impl<C> EndpointPool<C>
where
    C: ApiClient,
{
    /// Creates a pool over already-built clients, in selection order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `clients` is empty.
    pub fn new(clients: Vec<C>, config: PoolConfig) -> Result<Self> {
        if clients.is_empty() {
            return Err(Error::Configuration("no endpoints configured".to_string()));
        }

        info!(
            "Creating endpoint pool with {} endpoint(s): {}",
            clients.len(),
            clients
                .iter()
                .map(|client| client.hostname())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let excluded_until = vec![None; clients.len()];

        Ok(Self {
            inner: Arc::new(Inner {
                clients: clients.into_iter().map(Arc::new).collect(),
                config,
                state: Mutex::new(PoolState {
                    excluded_until,
                    cursor: 0,
                }),
                recovery: Mutex::new(RecoveryState::default()),
            }),
        })
    }

    /// The configuration this pool was created with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Checks that at least one endpoint answers by requesting the API
    /// version. Endpoints that fail are excluded like on any other request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`] if no endpoint answers.
    pub async fn initialize(&self) -> Result<()> {
        let value = self
            .execute(&Operation::Version, &CancellationToken::new())
            .await?;

        match serde_json::from_value::<Version>(value) {
            Ok(version) => info!(
                "Connected to Proxmox VE {} (release {})",
                version.version, version.release
            ),
            Err(e) => debug!("Could not decode version response: {}", e),
        }

        Ok(())
    }

    /// Issues `operation` against one active endpoint after another until
    /// one answers.
    ///
    /// Endpoints are chosen round-robin. Each endpoint is tried at most once
    /// per call. An endpoint that is unreachable or answers with a
    /// gateway-class status is excluded for the configured cool-down; other
    /// error responses move on to the next endpoint without excluding it.
    /// Cancelling `cancel` abandons the call without excluding the endpoint
    /// whose request was in flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires first, otherwise
    /// [`Error::Connectivity`] once no untried active endpoint is left.
    pub async fn execute(&self, operation: &Operation, cancel: &CancellationToken) -> Result<Value> {
        let mut tried = vec![false; self.inner.clients.len()];
        let mut attempts = 0;
        let mut last_error = None;

        while let Some((index, client)) = self.select(&tried) {
            tried[index] = true;
            attempts += 1;
            debug!("Requesting {} from {}", operation, client.hostname());

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Request {} to {} cancelled", operation, client.hostname());
                    return Err(Error::Cancelled {
                        operation: operation.name(),
                    });
                }
                result = client.get(operation) => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_endpoint_failure() => {
                    self.exclude(index, &e.to_string());
                    last_error = Some(e.to_string());
                }
                Err(e) => {
                    debug!("{} failed on {}: {}", operation, client.hostname(), e);
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(Error::Connectivity {
            operation: operation.name(),
            attempts,
            last_error: last_error.unwrap_or_else(|| "no active endpoint".to_string()),
        })
    }

    fn select(&self, tried: &[bool]) -> Option<(usize, Arc<C>)> {
        let mut state = self.inner.state.lock();
        let count = self.inner.clients.len();

        let index = (0..count)
            .map(|offset| (state.cursor + offset) % count)
            .find(|&index| !tried[index] && state.excluded_until[index].is_none())?;

        state.cursor = (index + 1) % count;
        Some((index, Arc::clone(&self.inner.clients[index])))
    }

    fn exclude(&self, index: usize, reason: &str) {
        let until = Instant::now() + self.inner.config.ban_duration;
        self.inner.state.lock().excluded_until[index] = Some(until);

        warn!(
            "Excluding endpoint {} for {:?}: {}",
            self.inner.clients[index].hostname(),
            self.inner.config.ban_duration,
            reason
        );
    }

    /// Checks every excluded endpoint whose cool-down has elapsed with a
    /// node listing request. Endpoints that answer become active again;
    /// the others stay excluded for another full cool-down.
    ///
    /// Returns the number of endpoints reactivated.
    pub async fn recover(&self) -> usize {
        let now = Instant::now();
        let due: Vec<usize> = {
            let state = self.inner.state.lock();
            state
                .excluded_until
                .iter()
                .enumerate()
                .filter_map(|(index, until)| until.filter(|until| now >= *until).map(|_| index))
                .collect()
        };

        if due.is_empty() {
            return 0;
        }

        let checks = due.into_iter().map(|index| {
            let client = Arc::clone(&self.inner.clients[index]);
            async move { (index, client.get(&Operation::Nodes).await) }
        });
        let results = join_all(checks).await;

        let mut recovered = 0;
        let mut state = self.inner.state.lock();
        for (index, result) in results {
            let hostname = self.inner.clients[index].hostname();
            match result {
                Ok(_) => {
                    state.excluded_until[index] = None;
                    recovered += 1;
                    info!("Endpoint {} recovered", hostname);
                }
                Err(e) => {
                    state.excluded_until[index] =
                        Some(Instant::now() + self.inner.config.ban_duration);
                    warn!("Endpoint {} still unavailable: {}", hostname, e);
                }
            }
        }

        recovered
    }

    /// Current state of every endpoint, in configuration order.
    #[must_use]
    pub fn statuses(&self) -> Vec<EndpointStatus> {
        let state = self.inner.state.lock();
        self.inner
            .clients
            .iter()
            .zip(&state.excluded_until)
            .map(|(client, until)| EndpointStatus {
                hostname: client.hostname().to_string(),
                state: until.map_or(EndpointState::Active, |until| EndpointState::Excluded {
                    until,
                }),
            })
            .collect()
    }

    /// Start the background recovery task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecoveryAlreadyStarted`] if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut recovery = self.inner.recovery.lock();
        if recovery.recovery_task.is_some() {
            return Err(Error::RecoveryAlreadyStarted);
        }

        let recovery_interval = self.inner.config.recovery_interval;
        info!(
            "Starting endpoint recovery task with interval {:?}",
            recovery_interval
        );

        let shutdown_token = CancellationToken::new();
        let task_token = shutdown_token.clone();
        let pool = self.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(recovery_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        pool.recover().await;
                    }
                    () = task_token.cancelled() => {
                        debug!("Endpoint recovery task received shutdown signal");
                        break;
                    }
                }
            }
        });

        recovery.recovery_task = Some(task);
        recovery.shutdown_token = Some(shutdown_token);

        Ok(())
    }

    /// Stop the background recovery task, if running.
    pub async fn shutdown(&self) {
        let (task, token) = {
            let mut recovery = self.inner.recovery.lock();
            (
                recovery.recovery_task.take(),
                recovery.shutdown_token.take(),
            )
        };

        if let Some(token) = token {
            token.cancel();
        }

        if let Some(task) = task {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => debug!("Endpoint recovery task shut down cleanly"),
                Ok(Err(e)) => error!("Endpoint recovery task panicked: {}", e),
                Err(_) => warn!("Endpoint recovery task did not shut down within timeout"),
            }
        }
    }
}
