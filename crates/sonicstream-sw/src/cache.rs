//! Named cache stores.
//!
//! A [`Cache`] maps request identity (method + URL, fragment excluded) to a
//! stored response. [`CacheStorage`] holds the named caches in creation
//! order and, when backed by a directory, writes itself to
//! `cache-storage.json` after every mutation.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, ServiceWorkerError};
use crate::fetch::{Request, Response, ResponseSource};

/// File name of the persisted storage inside the storage directory.
pub const STORAGE_FILE: &str = "cache-storage.json";

/// Options controlling how a request is matched against stored entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheQueryOptions {
    /// Ignore the query string when comparing URLs.
    pub ignore_search: bool,
    /// Allow non-GET requests to match.
    pub ignore_method: bool,
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL, fragment removed.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, repeats allowed. Values are the raw
    /// header bytes, base64-encoded.
    pub headers: Vec<(String, String)>,

    body: StoredBody,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Build an entry from a request and the response fetched for it.
    pub fn new(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), STANDARD.encode(value.as_bytes())))
            .collect();

        Self {
            url: cache_key(&request.url),
            method: request.method.as_str().to_string(),
            status: response.status.as_u16(),
            headers,
            body: StoredBody::Decoded(response.body.clone()),
            cached_at: now_millis(),
        }
    }

    /// Response body. Fails if the persisted body could not be decoded.
    pub fn body(&self) -> Result<Bytes> {
        match self.body {
            StoredBody::Decoded(ref body) => Ok(body.clone()),
            StoredBody::Corrupt(_) => Err(self.corrupt("body is not valid base64")),
        }
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Result<Response> {
        let url = Url::parse(&self.url).map_err(|e| self.corrupt(&format!("url: {e}")))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| self.corrupt(&format!("status {}", self.status)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| self.corrupt(&format!("header name {name:?}")))?;
            let value = STANDARD
                .decode(value)
                .ok()
                .and_then(|raw| HeaderValue::from_bytes(&raw).ok())
                .ok_or_else(|| self.corrupt(&format!("value of header {name}")))?;
            headers.append(header, value);
        }

        Ok(Response {
            status,
            headers,
            body: self.body()?,
            url,
            source: ResponseSource::Cache,
        })
    }

    fn is_corrupt(&self) -> bool {
        matches!(self.body, StoredBody::Corrupt(_))
    }

    fn corrupt(&self, what: &str) -> ServiceWorkerError {
        ServiceWorkerError::Cache(format!("stored entry for {} is corrupt: {what}", self.url))
    }
}

/// Body as persisted, base64 on disk. Text that fails to decode is kept
/// verbatim so the rest of the storage still loads and writes back as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StoredBody {
    Decoded(Bytes),
    Corrupt(String),
}

impl Serialize for StoredBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            StoredBody::Decoded(body) => serializer.serialize_str(&STANDARD.encode(body)),
            StoredBody::Corrupt(raw) => serializer.serialize_str(raw),
        }
    }
}

impl<'de> Deserialize<'de> for StoredBody {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Ok(match STANDARD.decode(&encoded) {
            Ok(body) => StoredBody::Decoded(body.into()),
            Err(_) => StoredBody::Corrupt(encoded),
        })
    }
}

/// A single named cache store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Entries keyed by URL.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new, empty cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Find the entry matching `request`.
    pub fn match_request(
        &self,
        request: &Request,
        options: &CacheQueryOptions,
    ) -> Option<&CacheEntry> {
        if !method_matches(&request.method, options) {
            return None;
        }

        if !options.ignore_search {
            return self.entries.get(&cache_key(&request.url));
        }

        let wanted = without_search(&request.url);
        self.entries
            .values()
            .filter(|entry| {
                Url::parse(&entry.url)
                    .map(|u| without_search(&u) == wanted)
                    .unwrap_or(false)
            })
            .min_by(|a, b| a.url.cmp(&b.url))
    }

    /// All entries matching `request`, or every entry when `request` is `None`.
    pub fn match_all(
        &self,
        request: Option<&Request>,
        options: &CacheQueryOptions,
    ) -> Vec<&CacheEntry> {
        let mut matched: Vec<&CacheEntry> = match request {
            Some(req) if !method_matches(&req.method, options) => Vec::new(),
            Some(req) => {
                let wanted = if options.ignore_search {
                    without_search(&req.url)
                } else {
                    cache_key(&req.url)
                };
                self.entries
                    .values()
                    .filter(|entry| {
                        if !options.ignore_search {
                            return entry.url == wanted;
                        }
                        Url::parse(&entry.url)
                            .map(|u| without_search(&u) == wanted)
                            .unwrap_or(false)
                    })
                    .collect()
            }
            None => self.entries.values().collect(),
        };
        matched.sort_by(|a, b| a.url.cmp(&b.url));
        matched
    }

    /// Store a response for a GET request, replacing any previous entry.
    pub fn put(&mut self, request: &Request, response: &Response) -> Result<()> {
        if request.method != Method::GET {
            return Err(ServiceWorkerError::Cache(format!(
                "only GET requests can be cached, got {}",
                request.method
            )));
        }
        let entry = CacheEntry::new(request, response);
        self.entries.insert(entry.url.clone(), entry);
        Ok(())
    }

    /// Delete the entry matching `request`.
    pub fn delete(&mut self, request: &Request, options: &CacheQueryOptions) -> bool {
        let key = match self.match_request(request, options) {
            Some(entry) => entry.url.clone(),
            None => return false,
        };
        self.entries.remove(&key).is_some()
    }

    /// Cached URLs, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// On-disk layout of the storage file.
#[derive(Deserialize)]
struct StoredCaches {
    caches: Vec<Cache>,
}

#[derive(Serialize)]
struct StoredCachesRef<'a> {
    caches: Vec<&'a Cache>,
}

/// All named caches (the `caches` global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    /// Names in creation order.
    order: Vec<String>,
    /// Storage directory, if persistent.
    dir: Option<PathBuf>,
}

impl CacheStorage {
    /// Create storage that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open storage backed by `dir`, loading any previously persisted caches.
    pub fn open_persistent(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut storage = Self {
            dir: Some(dir.clone()),
            ..Default::default()
        };

        let path = dir.join(STORAGE_FILE);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let stored: StoredCaches = serde_json::from_str(&contents)?;
            for cache in stored.caches {
                let corrupt = cache.entries.values().filter(|e| e.is_corrupt()).count();
                if corrupt > 0 {
                    warn!(cache = %cache.name, corrupt, "Cache has unreadable entries");
                }
                storage.order.push(cache.name.clone());
                storage.caches.insert(cache.name.clone(), cache);
            }
            info!(path = %path.display(), caches = storage.order.len(), "Loaded cache storage");
        }

        Ok(storage)
    }

    /// Storage directory, if persistent.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Open a cache, creating it if it doesn't exist.
    pub async fn open(&mut self, name: &str) -> Result<&Cache> {
        if !self.caches.contains_key(name) {
            debug!(cache = name, "Creating cache");
            self.caches.insert(name.to_string(), Cache::new(name));
            self.order.push(name.to_string());
            if let Err(e) = self.persist().await {
                self.caches.remove(name);
                self.order.pop();
                return Err(e);
            }
        }
        self.caches
            .get(name)
            .ok_or_else(|| ServiceWorkerError::NotFound(name.to_string()))
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Delete a cache.
    pub async fn delete(&mut self, name: &str) -> Result<bool> {
        let Some(removed) = self.caches.remove(name) else {
            return Ok(false);
        };
        let position = self.order.iter().position(|n| n == name);
        if let Some(pos) = position {
            self.order.remove(pos);
        }

        if let Err(e) = self.persist().await {
            self.caches.insert(name.to_string(), removed);
            if let Some(pos) = position {
                self.order.insert(pos, name.to_string());
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Cache names in creation order.
    pub fn keys(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Match across all caches, oldest first.
    pub fn match_request(
        &self,
        request: &Request,
        options: &CacheQueryOptions,
    ) -> Option<&CacheEntry> {
        self.order
            .iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(request, options))
    }

    /// Store a batch of pairs in the named cache as one unit.
    ///
    /// Either every pair is stored and persisted or the cache is left
    /// exactly as it was.
    pub async fn put_all(&mut self, name: &str, pairs: &[(Request, Response)]) -> Result<usize> {
        let current = self
            .caches
            .get(name)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("cache {name}")))?;

        let mut staged = current.clone();
        for (request, response) in pairs {
            staged.put(request, response)?;
        }

        let previous = self
            .caches
            .insert(name.to_string(), staged)
            .unwrap_or_else(|| Cache::new(name));

        if let Err(e) = self.persist().await {
            self.caches.insert(name.to_string(), previous);
            return Err(e);
        }

        debug!(cache = name, stored = pairs.len(), "Committed batch");
        Ok(pairs.len())
    }

    /// Write the storage file, if persistent. File I/O runs on the
    /// blocking pool.
    async fn persist(&self) -> Result<()> {
        let Some(ref dir) = self.dir else {
            return Ok(());
        };

        let snapshot = StoredCachesRef {
            caches: self
                .order
                .iter()
                .filter_map(|name| self.caches.get(name))
                .collect(),
        };
        let data = serde_json::to_vec(&snapshot)?;

        let path = dir.join(STORAGE_FILE);
        let tmp = dir.join(format!("{STORAGE_FILE}.tmp"));
        tokio::task::spawn_blocking(move || {
            std::fs::write(&tmp, data)?;
            std::fs::rename(&tmp, &path)
        })
        .await
        .map_err(|e| ServiceWorkerError::Storage(e.to_string()))??;
        Ok(())
    }
}

/// Key under which a URL is stored: the URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

fn without_search(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.set_query(None);
    url.to_string()
}

fn method_matches(method: &Method, options: &CacheQueryOptions) -> bool {
    options.ignore_method || *method == Method::GET
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
