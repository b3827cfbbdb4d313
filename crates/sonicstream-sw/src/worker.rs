//! The offline worker: precache on install, cache-first on fetch.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{cache_key, CacheEntry, CacheQueryOptions, CacheStorage};
use crate::error::{Result, ServiceWorkerError};
use crate::fetch::{Fetcher, Request, Response};
use crate::{CACHE_NAME, PRECACHE_ASSETS};

/// State shared by the install and fetch handlers.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    caches: Arc<RwLock<CacheStorage>>,
    script_url: Url,
}

impl WorkerContext {
    pub fn new(caches: CacheStorage, script_url: Url) -> Self {
        Self {
            caches: Arc::new(RwLock::new(caches)),
            script_url,
        }
    }

    /// Cache storage (the `caches` global).
    pub fn caches(&self) -> &Arc<RwLock<CacheStorage>> {
        &self.caches
    }

    /// URL the worker script was loaded from.
    pub fn script_url(&self) -> &Url {
        &self.script_url
    }

    /// Resolve a locator against the script URL. Absolute URLs pass through.
    pub fn resolve(&self, locator: &str) -> Result<Url> {
        self.script_url.join(locator).map_err(|e| {
            ServiceWorkerError::InvalidUrl(format!("{locator}: {e}"))
        })
    }
}

/// Cache-first offline worker.
pub struct OfflineWorker<F> {
    cache_name: String,
    assets: Vec<String>,
    network: F,
}

impl<F: Fetcher> OfflineWorker<F> {
    /// Worker precaching [`PRECACHE_ASSETS`] into [`CACHE_NAME`].
    pub fn new(network: F) -> Self {
        Self::with_assets(network, CACHE_NAME, PRECACHE_ASSETS.iter().copied())
    }

    /// Worker with a custom cache name and asset list.
    pub fn with_assets<I, S>(network: F, cache_name: &str, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cache_name: cache_name.to_string(),
            assets: assets.into_iter().map(Into::into).collect(),
            network,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// The network this worker falls through to.
    pub fn network(&self) -> &F {
        &self.network
    }

    /// Handle the install event.
    ///
    /// Opens the cache, fetches every asset, and stores them only if all
    /// of them came back 2xx. Returns the number of entries stored.
    pub async fn handle_install(&self, ctx: &WorkerContext) -> Result<usize> {
        info!(cache = %self.cache_name, assets = self.assets.len(), "Precaching assets");

        ctx.caches.write().await.open(&self.cache_name).await?;

        let requests = self.asset_requests(ctx)?;
        let pairs = try_join_all(requests.into_iter().map(|request| self.fetch_asset(request)))
            .await
            .inspect_err(|e| warn!(cache = %self.cache_name, error = %e, "Precache failed"))?;

        let stored = ctx
            .caches
            .write()
            .await
            .put_all(&self.cache_name, &pairs)
            .await?;

        info!(cache = %self.cache_name, stored, "Precache complete");
        Ok(stored)
    }

    /// Handle a fetch event: stored response if any, otherwise the network.
    pub async fn handle_fetch(&self, ctx: &WorkerContext, request: Request) -> Result<Response> {
        let cached = ctx
            .caches
            .read()
            .await
            .match_request(&request, &CacheQueryOptions::default())
            .map(CacheEntry::to_response);

        match cached {
            Some(response) => {
                debug!(url = %request.url, "Cache hit");
                response
            }
            None => {
                debug!(url = %request.url, "Cache miss");
                self.network.fetch(&request).await
            }
        }
    }

    fn asset_requests(&self, ctx: &WorkerContext) -> Result<Vec<Request>> {
        let mut seen = HashSet::new();
        let mut requests = Vec::with_capacity(self.assets.len());

        for locator in &self.assets {
            let url = ctx.resolve(locator)?;
            if !seen.insert(cache_key(&url)) {
                return Err(ServiceWorkerError::Cache(format!(
                    "duplicate asset in precache list: {url}"
                )));
            }
            requests.push(Request::get(url));
        }

        Ok(requests)
    }

    async fn fetch_asset(&self, request: Request) -> Result<(Request, Response)> {
        let response = self.network.fetch(&request).await?;
        if !response.ok() {
            return Err(ServiceWorkerError::BadResponse {
                url: request.url.to_string(),
                status: response.status.as_u16(),
            });
        }
        Ok((request, response))
    }
}
