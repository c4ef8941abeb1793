//! Named cache buckets with JSON persistence.
//!
//! A [`CacheStorage`] is a directory of buckets. Each [`CacheBucket`] maps a
//! request identity (`METHOD URL`, fragment stripped) to a stored
//! [`ResponseSnapshot`] and lives in one JSON file named by a SHA-256 digest
//! of the bucket name, so arbitrary names never touch the path.
//!
//! Buckets are written only by [`CacheBucket::add_all`], which is atomic:
//! either every response is stored or the bucket is left untouched.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{PrecacheError, Result};
use crate::network::Network;
use crate::request::{RequestDescriptor, ResponseSnapshot};

/// On-disk layout of one bucket.
#[derive(Debug, Serialize, Deserialize, Default)]
struct BucketFile {
    name: String,
    entries: BTreeMap<String, ResponseSnapshot>,
}

/// A directory of named cache buckets.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    dir: PathBuf,
}

impl CacheStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open the bucket called `name`, creating it (and the directory) if absent.
    pub async fn open(&self, name: &str) -> Result<CacheBucket> {
        let path = self.bucket_path(name);
        let file = match tokio::fs::read_to_string(&path).await {
            Ok(data) => {
                let file: BucketFile = serde_json::from_str(&data).map_err(|e| {
                    PrecacheError::Storage(format!(
                        "Bucket '{}' at {} is corrupt: {}",
                        name,
                        path.display(),
                        e
                    ))
                })?;
                debug!(cache = %name, entries = file.entries.len(), "Opened cache bucket");
                file
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let file = BucketFile {
                    name: name.to_string(),
                    entries: BTreeMap::new(),
                };
                write_bucket_file(&path, &file).await?;
                info!(cache = %name, "Created cache bucket");
                file
            }
            Err(e) => {
                return Err(PrecacheError::Storage(format!(
                    "Failed to read bucket '{}' at {}: {}",
                    name,
                    path.display(),
                    e
                )))
            }
        };
        Ok(CacheBucket {
            inner: Arc::new(BucketInner {
                name: name.to_string(),
                path,
                entries: RwLock::new(file.entries),
            }),
        })
    }

    /// `true` if a bucket called `name` has been created.
    ///
    /// An unreadable storage directory is an error, not a missing bucket.
    pub async fn has(&self, name: &str) -> Result<bool> {
        let path = self.bucket_path(name);
        tokio::fs::try_exists(&path).await.map_err(|e| {
            PrecacheError::Storage(format!("Failed to check {}: {}", path.display(), e))
        })
    }

    /// Names of every bucket in the directory, sorted.
    ///
    /// Stale buckets from earlier cache names show up here too; nothing
    /// removes them.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<BucketFile>(&data) {
                Ok(file) => names.push(file.name),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable bucket file"),
            }
        }
        names.sort();
        Ok(names)
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
        self.dir.join(format!("{}.json", &digest[..32]))
    }
}

struct BucketInner {
    name: String,
    path: PathBuf,
    entries: RwLock<BTreeMap<String, ResponseSnapshot>>,
}

/// Handle to an open bucket. Clones share the same entries.
#[derive(Clone)]
pub struct CacheBucket {
    inner: Arc<BucketInner>,
}

impl std::fmt::Debug for CacheBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBucket")
            .field("name", &self.inner.name)
            .field("path", &self.inner.path)
            .finish()
    }
}

impl CacheBucket {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Stored response for `request`, if any. No freshness check.
    pub async fn match_request(&self, request: &RequestDescriptor) -> Option<ResponseSnapshot> {
        self.inner
            .entries
            .read()
            .await
            .get(&request.cache_key())
            .cloned()
    }

    /// Fetch every request and store all responses, or store nothing.
    ///
    /// Fails if a request is not a `GET`, appears twice, cannot be fetched,
    /// or comes back with a non-2xx status. Fetches run concurrently and the
    /// first failure aborts the rest.
    pub async fn add_all(
        &self,
        requests: &[RequestDescriptor],
        network: &dyn Network,
    ) -> Result<usize> {
        let mut seen = HashSet::new();
        for request in requests {
            if request.method != reqwest::Method::GET {
                return Err(PrecacheError::Storage(format!(
                    "only GET requests can be cached, got {}",
                    request
                )));
            }
            if !seen.insert(request.cache_key()) {
                return Err(PrecacheError::Storage(format!(
                    "duplicate request in bulk add: {}",
                    request
                )));
            }
        }

        let responses = try_join_all(requests.iter().map(|request| async move {
            let response = network.fetch(request).await?;
            if !response.is_ok() {
                return Err(PrecacheError::Network(format!(
                    "{} returned status {}",
                    request.url, response.status
                )));
            }
            Ok::<_, PrecacheError>((request.cache_key(), response))
        }))
        .await?;

        let now = Utc::now();
        let mut entries = self.inner.entries.write().await;
        let mut next = entries.clone();
        for (key, mut response) in responses {
            response.stored_at = Some(now);
            next.insert(key, response);
        }
        let file = BucketFile {
            name: self.inner.name.clone(),
            entries: next,
        };
        write_bucket_file(&self.inner.path, &file).await?;
        *entries = file.entries;
        debug!(cache = %self.inner.name, added = requests.len(), "Bulk add committed");
        Ok(requests.len())
    }

    /// Stored request identities, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.inner.entries.read().await.keys().cloned().collect()
    }

    /// Snapshot of every stored entry, sorted by identity.
    pub async fn entries(&self) -> Vec<(String, ResponseSnapshot)> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.entries.read().await.is_empty()
    }
}

/// Write via a temp file and rename so readers never see a torn bucket.
async fn write_bucket_file(path: &Path, file: &BucketFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, data).await.map_err(|e| {
        PrecacheError::Storage(format!("Failed to write {}: {}", tmp.display(), e))
    })?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        PrecacheError::Storage(format!("Failed to replace {}: {}", path.display(), e))
    })?;
    Ok(())
}
