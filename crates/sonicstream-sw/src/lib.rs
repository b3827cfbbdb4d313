//! # SonicStream Offline Worker
//!
//! Cache-first offline worker for the SonicStream front-end.
//!
//! ## Features
//!
//! - **Install**: precache a fixed asset list into `sonicstream-v1`, all or nothing
//! - **Fetch**: answer from any cache store, otherwise go to the network
//! - **Cache API**: named stores with optional on-disk persistence
//! - **Host**: lifecycle (installing, waiting, active) and event dispatch
//!
//! ## Architecture
//!
//! ```text
//! WorkerHost
//!     ├── ServiceWorkerRegistration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting (ServiceWorker)
//!     │       └── active (ServiceWorker)
//!     ├── OfflineWorker ── Fetcher (network)
//!     └── WorkerContext
//!             └── CacheStorage
//!                     └── Cache
//!                             └── Request → Response
//! ```

pub mod cache;
pub mod error;
pub mod fetch;
pub mod host;
pub mod registration;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use cache::{Cache, CacheEntry, CacheQueryOptions, CacheStorage};
pub use error::{Result, ServiceWorkerError};
pub use fetch::{Fetcher, HttpFetcher, Request, Response, ResponseSource};
pub use host::{ServiceWorkerEvent, WorkerHost};
pub use registration::{
    ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState,
};
pub use worker::{OfflineWorker, WorkerContext};

/// Name of the cache store populated on install. Bumping it is the only way
/// a new asset set gets adopted; stores under older names are left behind.
pub const CACHE_NAME: &str = "sonicstream-v1";

/// Assets fetched and stored on install, relative to the worker script.
pub const PRECACHE_ASSETS: &[&str] = &[
    "/",
    "/static/icon.svg",
    "/static/manifest.json",
    "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css",
    "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;600;700&display=swap",
    "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css",
];
