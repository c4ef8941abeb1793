//! Offline worker: install-time cache seeding and cache-first fetch.
//!
//! [`OfflineWorker::install`] opens the named bucket and bulk-adds every
//! asset; [`OfflineWorker::handle_fetch`] answers from that bucket and falls
//! through to the network on a miss. Network responses are never written
//! back, so the bucket only ever holds what install put there.
//!
//! The worker is driven by lifecycle events; see [`events`].

pub mod events;

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{PrecacheError, Result};
use crate::network::Network;
use crate::request::{RequestDescriptor, ResponseSnapshot};
use crate::storage::{CacheBucket, CacheStorage};

pub use events::{spawn_worker, WorkerEvent, WorkerHandle};

/// What the worker caches and where the assets come from.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub cache_name: String,
    pub origin: Url,
    /// Relative paths, resolved against `origin` at install.
    pub assets: Vec<String>,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            cache_name: config.cache_name.clone(),
            origin: config.origin_url()?,
            assets: config.assets.clone(),
        })
    }
}

/// Cache seeder plus fetch interceptor over one named bucket.
pub struct OfflineWorker {
    settings: WorkerSettings,
    storage: CacheStorage,
    network: Arc<dyn Network>,
    bucket: OnceCell<CacheBucket>,
}

impl OfflineWorker {
    pub fn new(settings: WorkerSettings, storage: CacheStorage, network: Arc<dyn Network>) -> Self {
        Self {
            settings,
            storage,
            network,
            bucket: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Seed the bucket with every asset. Returns the number stored.
    ///
    /// All or nothing: any unreachable or non-2xx asset fails the whole
    /// install and leaves the bucket as it was. No retry.
    pub async fn install(&self) -> Result<usize> {
        let requests = self
            .settings
            .assets
            .iter()
            .map(|path| {
                RequestDescriptor::resolve(&self.settings.origin, path).map_err(|e| {
                    PrecacheError::Install(format!("asset '{}' does not resolve: {}", path, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let bucket = self
            .bucket()
            .await
            .map_err(|e| PrecacheError::Install(e.to_string()))?;
        info!(cache = %bucket.name(), assets = requests.len(), "Installing");

        match bucket.add_all(&requests, self.network.as_ref()).await {
            Ok(count) => {
                info!(cache = %bucket.name(), stored = count, "Install complete");
                Ok(count)
            }
            Err(e) => {
                warn!(cache = %bucket.name(), error = %e, "Install failed");
                Err(PrecacheError::Install(e.to_string()))
            }
        }
    }

    /// Answer `request` from the bucket, or from the network on a miss.
    ///
    /// A cached entry is returned unconditionally. On a miss the network is
    /// called exactly once and its response returned as-is, whatever the
    /// status; transport errors propagate.
    pub async fn handle_fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot> {
        if let Some(bucket) = self.existing_bucket().await? {
            if let Some(hit) = bucket.match_request(request).await {
                debug!(url = %request.url, "Cache hit");
                return Ok(hit);
            }
        }
        debug!(url = %request.url, "Cache miss, fetching from network");
        self.network.fetch(request).await
    }

    /// The named bucket, opened (and created) on first use.
    pub async fn bucket(&self) -> Result<&CacheBucket> {
        self.bucket
            .get_or_try_init(|| self.storage.open(&self.settings.cache_name))
            .await
    }

    /// The bucket if install (or anything else) has created it. A fetch
    /// before install should not create an empty bucket.
    async fn existing_bucket(&self) -> Result<Option<&CacheBucket>> {
        if self.bucket.get().is_none() && !self.storage.has(&self.settings.cache_name).await? {
            return Ok(None);
        }
        self.bucket().await.map(Some)
    }
}
