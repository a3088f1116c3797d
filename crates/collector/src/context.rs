use std::fmt;

use parking_lot::RwLock;
use proxmox_exporter_api::{ApiClient, HttpClient, Operation};
use proxmox_exporter_cache::ResponseCache;
use proxmox_exporter_pool::EndpointPool;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Cache of raw upstream payloads, keyed by [`Operation::cache_key`].
pub type PayloadCache = ResponseCache<Value, proxmox_exporter_pool::Error>;

/// State shared by every scrape of one cluster: the endpoint pool, the
/// response cache and the detected cluster name.
pub struct ClusterContext<C = HttpClient>
where
    C: ApiClient,
{
    pool: EndpointPool<C>,
    cache: PayloadCache,
    pub(crate) cluster_name: RwLock<Option<String>>,
}

impl<C> ClusterContext<C>
where
    C: ApiClient,
{
    /// Create a new context
    #[must_use]
    pub fn new(pool: EndpointPool<C>, cache: PayloadCache) -> Self {
        Self {
            pool,
            cache,
            cluster_name: RwLock::new(None),
        }
    }

    /// The endpoint pool.
    #[must_use]
    pub const fn pool(&self) -> &EndpointPool<C> {
        &self.pool
    }

    /// The response cache.
    #[must_use]
    pub const fn cache(&self) -> &PayloadCache {
        &self.cache
    }

    /// Name of the cluster, if one was detected.
    #[must_use]
    pub fn cluster_name(&self) -> Option<String> {
        self.cluster_name.read().clone()
    }

    /// Returns the raw payload for `operation`, from the cache when a live
    /// entry exists and from the pool otherwise.
    ///
    /// Concurrent callers share one upstream request. Cancelling `cancel`
    /// only abandons this caller's wait; the request keeps running for the
    /// other waiters and is dropped once none is left.
    ///
    /// # Errors
    ///
    /// Returns the pool error if no endpoint answered, or a cancellation
    /// error if `cancel` fires first.
    pub async fn fetch_raw(&self, operation: &Operation, cancel: &CancellationToken) -> Result<Value> {
        let pool = self.pool.clone();
        let owned = operation.clone();
        let key = operation.cache_key();

        let fetch = self.cache.get_or_fetch(&key, move || async move {
            pool.execute(&owned, &CancellationToken::new()).await
        });

        let value = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(proxmox_exporter_pool::Error::Cancelled {
                    operation: operation.name(),
                }
                .into());
            }
            result = fetch => result?,
        };

        Ok(value)
    }

    /// Like [`Self::fetch_raw`], decoding the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns the pool error if no endpoint answered, or a decode error if
    /// the payload does not match `T`.
    pub async fn fetch<T>(&self, operation: &Operation, cancel: &CancellationToken) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let value = self.fetch_raw(operation, cancel).await?;
        serde_json::from_value(value).map_err(|source| Error::Decode {
            operation: operation.name(),
            source,
        })
    }
}

impl<C> fmt::Debug for ClusterContext<C>
where
    C: ApiClient,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterContext")
            .field("cluster_name", &*self.cluster_name.read())
            .field("cached_entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}
