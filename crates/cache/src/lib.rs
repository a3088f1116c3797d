//! Short-lived response cache that shields the upstream API from redundant
//! polling.
//!
//! Entries expire after a fixed TTL and are never returned once expired. A
//! background sweeper evicts expired entries. [`ResponseCache::get_or_fetch`]
//! collapses concurrent misses for the same key into one upstream call.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::{Error, Result};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Default lifetime of a cache entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24);

/// Default interval between sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

type Fetch<V, E> = BoxFuture<'static, std::result::Result<V, E>>;

/// Configuration for the response cache
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Lifetime of entries stored without an explicit TTL
    pub ttl: Duration,

    /// Interval at which expired entries are evicted
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Cache statistics
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    /// Lookups answered from a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Callers that joined a fetch already in flight for their key.
    pub joins: u64,
    /// Entries removed by sweeps.
    pub evictions: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Default)]
struct SweeperState {
    sweep_task: Option<JoinHandle<()>>,
    shutdown_signal: Option<oneshot::Sender<()>>,
}

struct Inner<V, E> {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    in_flight: Mutex<HashMap<String, WeakShared<Fetch<V, E>>>>,
    counters: Counters,
    sweeper: Mutex<SweeperState>,
}

impl<V, E> Inner<V, E>
where
    V: Clone,
{
    fn lookup(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    fn insert(&self, key: String, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .insert(key, CacheEntry { value, expires_at });
    }
}

/// TTL cache of upstream responses, keyed by an endpoint-agnostic string.
///
/// `V` is the cached value and `E` the error a fetch can fail with. Errors
/// are handed to every caller waiting on the fetch but never stored.
pub struct ResponseCache<V, E> {
    inner: Arc<Inner<V, E>>,
}

impl<V, E> Clone for ResponseCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> Default for ResponseCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<V, E> ResponseCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a new cache
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        debug!(
            "Creating response cache with ttl {:?} and sweep interval {:?}",
            config.ttl, config.sweep_interval
        );

        Self {
            inner: Arc::new(Inner {
                config,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                counters: Counters::default(),
                sweeper: Mutex::new(SweeperState::default()),
            }),
        }
    }

    /// The configuration this cache was created with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns the value for `key` if it has not expired.
    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(value) = self.inner.lookup(key) {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for {}", key);
            Some(value)
        } else {
            self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            trace!("Cache miss for {}", key);
            None
        }
    }

    /// Stores `value` under `key` with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.inner.insert(key.into(), value, self.inner.config.ttl);
    }

    /// Stores `value` under `key`, expiring after `ttl`.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.inner.insert(key.into(), value, ttl);
    }

    /// Removes `key`, returning whether an entry (live or expired) existed.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.entries.write().remove(key).is_some()
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Evicts every expired entry and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let removed = {
            let mut entries = self.inner.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| now < entry.expires_at);
            before - entries.len()
        };

        // Fetches whose callers all went away leave a dead handle behind.
        self.inner
            .in_flight
            .lock()
            .retain(|_, fetch| fetch.upgrade().is_some());

        if removed > 0 {
            self.inner
                .counters
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Swept {} expired cache entries", removed);
        }

        removed
    }

    /// Returns the live value for `key`, or obtains it with `fetch`.
    ///
    /// If another caller is already fetching the same key, this call waits
    /// for that fetch instead of starting a second one. A successful result
    /// is stored with the default TTL; a failure is returned to every waiter
    /// and not stored.
    ///
    /// # Errors
    ///
    /// Returns the error produced by the fetch this call started or joined.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let shared = {
            let mut in_flight = self.inner.in_flight.lock();

            // A fetch may have completed between the miss above and taking
            // the lock.
            if let Some(value) = self.inner.lookup(key) {
                return Ok(value);
            }

            match in_flight.get(key).and_then(WeakShared::upgrade) {
                Some(shared) => {
                    self.inner.counters.joins.fetch_add(1, Ordering::Relaxed);
                    debug!("Joining in-flight fetch for {}", key);
                    shared
                }
                None => {
                    let shared = self.start_fetch(key.to_string(), fetch());
                    if let Some(weak) = shared.downgrade() {
                        in_flight.insert(key.to_string(), weak);
                    }
                    shared
                }
            }
        };

        shared.await
    }

    fn start_fetch<Fut>(&self, key: String, fetch: Fut) -> Shared<Fetch<V, E>>
    where
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);

        async move {
            let result = fetch.await;
            if let Ok(value) = &result {
                inner.insert(key.clone(), value.clone(), inner.config.ttl);
            }
            inner.in_flight.lock().remove(&key);
            result
        }
        .boxed()
        .shared()
    }

    /// Snapshot of the cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            joins: counters.joins.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Start the background sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] if the sweeper is running.
    pub fn start(&self) -> Result<()> {
        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.sweep_task.is_some() {
            return Err(Error::AlreadyStarted);
        }

        info!(
            "Starting cache sweeper with interval {:?}",
            self.inner.config.sweep_interval
        );

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let cache = self.clone();
        let sweep_interval = self.inner.config.sweep_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        cache.sweep();
                    }
                    _ = &mut shutdown_rx => {
                        debug!("Cache sweeper received shutdown signal");
                        break;
                    }
                }
            }
        });

        sweeper.sweep_task = Some(task);
        sweeper.shutdown_signal = Some(shutdown_tx);

        Ok(())
    }

    /// Stop the background sweeper, if running.
    pub async fn shutdown(&self) {
        let (task, signal) = {
            let mut sweeper = self.inner.sweeper.lock();
            (sweeper.sweep_task.take(), sweeper.shutdown_signal.take())
        };

        if let Some(signal) = signal {
            let _ = signal.send(());
        }

        if let Some(task) = task {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => debug!("Cache sweeper shut down cleanly"),
                Ok(Err(e)) => error!("Cache sweeper panicked: {}", e),
                Err(_) => warn!("Cache sweeper did not shut down within timeout"),
            }
        }
    }
}
