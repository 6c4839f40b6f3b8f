/// Shared key/value store for write-location markers
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::BoxError;

/// Key/value store shared by every process of the application
///
/// Values written with [`SharedCache::set`] must disappear once their TTL
/// has passed.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BoxError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BoxError>;

    async fn delete(&self, key: &str) -> Result<(), BoxError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// `None` when the TTL reaches past what the clock can represent
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// In-process cache, for single-process deployments and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove expired entries
    pub async fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();

        entries.retain(|_, entry| entry.is_live(now));

        let cleaned = before - entries.len();
        if cleaned > 0 {
            tracing::debug!(cleaned, "Cleaned up expired cache entries");
        }
        cleaned
    }

    /// Sweep expired entries every `period`, forever
    ///
    /// Meant to be spawned next to the cache; `get` hides expired entries but
    /// only this removes them.
    pub async fn start_cleanup_task(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));

        loop {
            interval.tick().await;
            self.cleanup_expired().await;
        }
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, BoxError> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        let value = entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BoxError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BoxError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
