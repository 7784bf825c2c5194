//! Response cache
//!
//! Stores final (unsanitized) answers keyed by the raw query text. The cache
//! is advisory: lookups that fail count as misses and writes happen in the
//! background, so a broken backend can only cost latency, never an answer.

pub mod postgres;

use crate::config::{AppConfig, CacheBackendKind};
use crate::models::CachedAnswer;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use postgres::PostgresCache;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, query: &str) -> Result<Option<CachedAnswer>>;
    async fn set(&self, query: &str, answer: &CachedAnswer) -> Result<()>;

    fn name(&self) -> &'static str;
}

struct Entry {
    answer: CachedAnswer,
    expires_at: Instant,
}

/// Process-local cache with a fixed time-to-live.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl InMemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, query: &str) -> Result<Option<CachedAnswer>> {
        {
            let entries = self.entries.read().await;
            match entries.get(query) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.answer.clone()))
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // expired
        let mut entries = self.entries.write().await;
        if entries
            .get(query)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(query);
        }
        Ok(None)
    }

    async fn set(&self, query: &str, answer: &CachedAnswer) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            query.to_string(),
            Entry {
                answer: answer.clone(),
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Never stores anything.
pub struct NoopCache;

#[async_trait]
impl CacheBackend for NoopCache {
    async fn get(&self, _query: &str) -> Result<Option<CachedAnswer>> {
        Ok(None)
    }

    async fn set(&self, _query: &str, _answer: &CachedAnswer) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Error-swallowing front for whichever backend is configured.
#[derive(Clone)]
pub struct ResponseCache {
    backend: Arc<dyn CacheBackend>,
}

impl ResponseCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryCache::new(ttl)))
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopCache))
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let cache = match (config.cache_backend, &config.database_url) {
            (CacheBackendKind::Postgres, Some(url)) => {
                Self::new(Arc::new(PostgresCache::connect_lazy(url, config.cache_ttl)?))
            }
            (CacheBackendKind::Disabled, _) => Self::disabled(),
            _ => Self::in_memory(config.cache_ttl),
        };

        info!(backend = cache.backend.name(), "Response cache backend selected");
        Ok(cache)
    }

    pub async fn get(&self, query: &str) -> Option<CachedAnswer> {
        match self.backend.get(query).await {
            Ok(Some(answer)) => {
                debug!(backend = self.backend.name(), "Cache hit");
                Some(answer)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(backend = self.backend.name(), "Cache lookup failed, treating as miss: {}", e);
                None
            }
        }
    }

    /// Store an answer without waiting for the backend.
    pub fn set(&self, query: &str, answer: CachedAnswer) -> tokio::task::JoinHandle<()> {
        let backend = self.backend.clone();
        let query = query.to_string();

        tokio::spawn(async move {
            if let Err(e) = backend.set(&query, &answer).await {
                warn!(backend = backend.name(), "Cache write failed: {}", e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::models::{FetchResults, Source};
    use serde_json::json;

    fn answer(text: &str) -> CachedAnswer {
        let mut data = FetchResults::new();
        data.insert("TSLA_price".to_string(), json!({ "results": [{ "c": 110.0 }] }));
        CachedAnswer {
            answer: text.to_string(),
            sources: vec![Source {
                title: Some("Tesla news".to_string()),
                url: Some("https://news.example.com/TSLA/1".to_string()),
            }],
            data,
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl CacheBackend for BrokenCache {
        async fn get(&self, _query: &str) -> Result<Option<CachedAnswer>> {
            Err(SearchError::CacheError("connection reset".to_string()))
        }

        async fn set(&self, _query: &str, _answer: &CachedAnswer) -> Result<()> {
            Err(SearchError::CacheError("connection reset".to_string()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = ResponseCache::in_memory(Duration::from_secs(60));
        cache.set("What is TSLA at?", answer("TSLA is at $110")).await.unwrap();

        let hit = cache.get("What is TSLA at?").await.unwrap();
        assert_eq!(hit, answer("TSLA is at $110"));
    }

    #[tokio::test]
    async fn test_key_is_raw_query() {
        let cache = ResponseCache::in_memory(Duration::from_secs(60));
        cache.set("What is TSLA at?", answer("a")).await.unwrap();

        assert!(cache.get("what is tsla at?").await.is_none());
        assert!(cache.get("What is TSLA at? ").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let backend = Arc::new(InMemoryCache::new(Duration::from_secs(10)));
        let cache = ResponseCache::new(backend.clone());
        cache.set("q", answer("a")).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get("q").await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("q").await.is_none());
        assert_eq!(backend.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_prune_expired_entries() {
        let backend = InMemoryCache::new(Duration::from_secs(10));
        for i in 0..50 {
            backend.set(&format!("query {}", i), &answer("a")).await.unwrap();
        }
        assert_eq!(backend.len().await, 50);

        tokio::time::advance(Duration::from_secs(5)).await;
        backend.set("fresh", &answer("b")).await.unwrap();
        assert_eq!(backend.len().await, 51);

        tokio::time::advance(Duration::from_secs(6)).await;
        backend.set("newest", &answer("c")).await.unwrap();
        assert_eq!(backend.len().await, 2);
        assert!(backend.get("query 0").await.unwrap().is_none());
        assert!(backend.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let cache = ResponseCache::new(Arc::new(BrokenCache));

        assert!(cache.get("q").await.is_none());
        tokio_test::assert_ok!(cache.set("q", answer("a")).await);
    }

    #[tokio::test]
    async fn test_disabled_never_hits() {
        let cache = ResponseCache::disabled();
        cache.set("q", answer("a")).await.unwrap();
        assert!(cache.get("q").await.is_none());
    }
}
