//! # swkit worker
//!
//! An offline caching service worker: every intercepted request is routed to
//! one of a small set of caching strategies backed by a versioned cache store.
//!
//! ## Features
//!
//! - **Routing**: API calls, static assets, and navigations each get a strategy
//! - **Strategies**: cache-first, network-first, stale-while-revalidate, and a
//!   network-then-cache fallback
//! - **Lifecycle**: install seeds the current cache generation all-or-nothing,
//!   activate evicts every other generation and claims open clients
//! - **Background work**: refreshes and revalidations run as detached jobs
//! - **Background sync**: tag-dispatched, pluggable handler
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     ├── Registration
//!     │       ├── installing (WorkerVersion)
//!     │       ├── waiting    (WorkerVersion)
//!     │       └── active     (WorkerVersion) ── Router ── Route
//!     ├── Clients
//!     └── StrategyContext
//!             ├── Fetcher     (network)
//!             ├── CacheStore  (generation → RequestKey → CacheEntry)
//!             └── BackgroundJobs
//! ```

use swkit_common::CommonError;
use swkit_net::NetError;
use thiserror::Error;

pub mod background;
pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod lifecycle;
pub mod router;
pub mod strategy;
pub mod sync;

pub use background::BackgroundJobs;
pub use cache::{CacheEntry, CacheStore, MemoryCacheStore, RequestKey};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::{InstallConfig, WorkerConfig};
pub use container::{FetchEvent, ServiceWorkerContainer, ServiceWorkerEvent};
pub use lifecycle::{Registration, ServiceWorkerState, WorkerId, WorkerVersion};
pub use router::{Route, Router};
pub use strategy::StrategyContext;
pub use sync::{NoopSyncHandler, SyncEvent, SyncHandler, SyncManager, SyncOutcome};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    /// The network fetch was rejected or timed out.
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Neither the cache nor the network produced a response.
    #[error("No content available for {0}")]
    NoContentAvailable(String),

    /// A cache write was refused. Strategies log and drop these.
    #[error("Cache write failed: {0}")]
    CacheWrite(String),

    /// A static asset could not be pre-cached; the install is aborted.
    #[error("Install failed seeding {url}: {reason}")]
    InstallSeed { url: String, reason: String },

    #[error("State error: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl ServiceWorkerError {
    pub(crate) fn network(url: &url::Url, err: &NetError) -> Self {
        Self::NetworkUnavailable(format!("{url}: {err}"))
    }
}

impl From<CommonError> for ServiceWorkerError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Timeout(after) => {
                Self::NetworkUnavailable(format!("timed out after {after:?}"))
            }
            other => Self::Config(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
