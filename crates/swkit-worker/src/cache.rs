//! Cache store: named generations of request → response entries.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use swkit_net::{Request, Response};
use tokio::sync::RwLock;
use tracing::trace;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Identity of a cache entry: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Method,
    url: String,
}

impl RequestKey {
    pub fn new(method: Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method,
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn from_request(request: &Request) -> Self {
        Self::new(request.method.clone(), &request.url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Milliseconds since the epoch.
    pub cached_at: u64,
}

impl CacheEntry {
    pub fn from_response(response: Response) -> Self {
        let (url, status, headers, body) = response.into_parts();
        Self {
            url,
            status,
            headers,
            body,
            cached_at: now_millis(),
        }
    }

    /// Materialise a fresh readable response.
    pub fn to_response(&self) -> Response {
        Response::new(
            self.url.clone(),
            self.status,
            self.headers.clone(),
            self.body.clone(),
        )
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Cache store shared by every strategy.
///
/// Writes are last-write-wins; there is no locking across a read and a
/// subsequent write.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a generation, creating it if missing. Returns `true` if created.
    async fn open(&self, generation: &str) -> bool;

    async fn has(&self, generation: &str) -> bool;

    /// Names of all generations.
    async fn generations(&self) -> Vec<String>;

    /// Drop a whole generation. Returns `true` if it existed.
    async fn delete_generation(&self, generation: &str) -> bool;

    async fn lookup(&self, generation: &str, key: &RequestKey) -> Option<Response>;

    /// Store a response, creating the generation if needed.
    async fn store(&self, generation: &str, key: RequestKey, response: Response) -> Result<()>;

    /// Store every entry or none of them.
    async fn store_all(&self, generation: &str, entries: Vec<(RequestKey, Response)>)
        -> Result<()>;
}

/// One named generation.
#[derive(Debug, Default)]
pub struct Cache {
    pub name: String,
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: RequestKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }
}

/// Reject writes the platform cache would refuse.
fn check_storable(key: &RequestKey, response: &Response) -> Result<()> {
    if key.method() != Method::GET {
        return Err(ServiceWorkerError::CacheWrite(format!(
            "request method '{}' is unsupported",
            key.method()
        )));
    }
    if response.status == StatusCode::PARTIAL_CONTENT {
        return Err(ServiceWorkerError::CacheWrite(format!(
            "partial response for {} is unsupported",
            key.url()
        )));
    }
    Ok(())
}

/// In-memory [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a generation, `None` if it does not exist.
    pub async fn entry_count(&self, generation: &str) -> Option<usize> {
        self.caches.read().await.get(generation).map(Cache::len)
    }

    /// Keys stored in a generation.
    pub async fn keys(&self, generation: &str) -> Vec<RequestKey> {
        self.caches
            .read()
            .await
            .get(generation)
            .map(|c| c.keys().into_iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, generation: &str) -> bool {
        let mut caches = self.caches.write().await;
        if caches.contains_key(generation) {
            return false;
        }
        caches.insert(generation.to_string(), Cache::new(generation));
        true
    }

    async fn has(&self, generation: &str) -> bool {
        self.caches.read().await.contains_key(generation)
    }

    async fn generations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn delete_generation(&self, generation: &str) -> bool {
        self.caches.write().await.remove(generation).is_some()
    }

    async fn lookup(&self, generation: &str, key: &RequestKey) -> Option<Response> {
        let caches = self.caches.read().await;
        let entry = caches.get(generation)?.get(key)?;
        trace!(generation, key = %key, "Cache hit");
        Some(entry.to_response())
    }

    async fn store(&self, generation: &str, key: RequestKey, response: Response) -> Result<()> {
        check_storable(&key, &response)?;
        let entry = CacheEntry::from_response(response);
        self.caches
            .write()
            .await
            .entry(generation.to_string())
            .or_insert_with(|| Cache::new(generation))
            .put(key, entry);
        Ok(())
    }

    async fn store_all(
        &self,
        generation: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<()> {
        for (key, response) in &entries {
            check_storable(key, response)?;
        }

        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(generation.to_string())
            .or_insert_with(|| Cache::new(generation));
        for (key, response) in entries {
            cache.put(key, CacheEntry::from_response(response));
        }
        Ok(())
    }
}
