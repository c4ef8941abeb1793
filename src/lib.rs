//! Precache: an offline-first cache proxy.
//!
//! On install the worker seeds a named cache bucket with a fixed asset list;
//! afterwards every fetch is answered from that bucket first and falls back
//! to the network on a miss.

pub mod config;
pub mod error;
pub mod network;
pub mod request;
pub mod server;
pub mod storage;
pub mod worker;

pub use config::Config;
pub use error::{PrecacheError, Result};
pub use network::{HttpNetwork, Network};
pub use request::{RequestDescriptor, ResponseSnapshot};
pub use storage::{CacheBucket, CacheStorage};
pub use worker::{OfflineWorker, WorkerHandle, WorkerSettings};
