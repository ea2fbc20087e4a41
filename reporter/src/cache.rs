use std::future::Future;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

#[derive(Debug)]
struct Entry {
    stored_at: Instant,
    response: String,
}

/// Rendered responses by request fingerprint.
///
/// Only the response text is kept, never the documents it was built from. Entries expire after
/// the TTL and the least recently used entry is evicted once the cache is full.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl ResponseCache {
    /// A capacity of 0 is raised to 1.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<String> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if now.saturating_duration_since(entry.stored_at) < self.ttl => {
                return Some(entry.response.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            log::trace!("Response {key} expired");
            entries.pop(key);
        }
        None
    }

    pub fn insert(&self, key: String, response: String) {
        self.entries.lock().put(
            key,
            Entry {
                stored_at: Instant::now(),
                response,
            },
        );
    }

    /// The cached response for `key`, or the one built by `build`, which is then cached.
    ///
    /// Failed builds are not cached.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: String, build: F) -> anyhow::Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        if let Some(response) = self.get(&key) {
            log::debug!("Using cached response {key}");
            return Ok(response);
        }

        let response = build().await?;
        self.insert(key, response.clone());
        Ok(response)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
