//! Key-value cache port with TTL classes.
//!
//! The orchestrator reads session context through [`GameCache`] first and
//! only falls back to the store on a miss. Values are JSON so any backend
//! that can hold strings can implement the port.

use crate::world::SessionId;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// How long a cached value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlClass {
    /// 5 minutes.
    Short,
    /// 30 minutes.
    Medium,
    /// 1 hour.
    Long,
    /// 24 hours.
    Session,
    /// 1 week.
    Persistent,
}

impl TtlClass {
    pub fn duration(&self) -> Duration {
        const MINUTE: u64 = 60;
        match self {
            TtlClass::Short => Duration::from_secs(5 * MINUTE),
            TtlClass::Medium => Duration::from_secs(30 * MINUTE),
            TtlClass::Long => Duration::from_secs(60 * MINUTE),
            TtlClass::Session => Duration::from_secs(24 * 60 * MINUTE),
            TtlClass::Persistent => Duration::from_secs(7 * 24 * 60 * MINUTE),
        }
    }
}

#[async_trait]
pub trait GameCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    async fn set(&self, key: &str, value: serde_json::Value, ttl: TtlClass) -> Result<(), CacheError>;

    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
}

pub fn session_key(session_id: &SessionId) -> String {
    format!("session:{session_id}")
}

pub fn character_key(session_id: &SessionId) -> String {
    format!("character:{session_id}")
}

/// Read and decode a typed value.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn GameCache,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and write a typed value.
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn GameCache,
    key: &str,
    value: &T,
    ttl: TtlClass,
) -> Result<(), CacheError> {
    cache.set(key, serde_json::to_value(value)?, ttl).await
}

// ============================================================================
// In-memory cache
// ============================================================================

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local cache with per-entry expiry.
///
/// Expired entries are invisible to readers but only removed by
/// [`MemoryCache::cleanup_expired`] or an overwrite.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with an explicit expiry (tests only).
    #[cfg(test)]
    async fn insert_expiring_at(&self, key: &str, value: serde_json::Value, expires_at: Instant) {
        self.entries
            .write()
            .await
            .insert(key.to_string(), CacheEntry { value, expires_at });
    }

    /// Remove expired entries, returning how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.is_live(now));
        before - guard.len()
    }

    /// Entry count, including expired entries not yet cleaned.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl GameCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let now = Instant::now();
        let guard = self.entries.read().await;
        Ok(guard
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: TtlClass) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl.duration(),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .write()
            .await
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    #[test]
    fn test_ttl_classes() {
        assert_eq!(TtlClass::Short.duration(), Duration::from_secs(300));
        assert_eq!(TtlClass::Medium.duration(), Duration::from_secs(1800));
        assert_eq!(TtlClass::Long.duration(), Duration::from_secs(3600));
        assert_eq!(TtlClass::Session.duration(), Duration::from_secs(86_400));
        assert_eq!(TtlClass::Persistent.duration(), Duration::from_secs(604_800));
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let cache = MemoryCache::new();
        let note = Note {
            text: "the door is locked".to_string(),
        };
        set_json(&cache, "note", &note, TtlClass::Short).await.unwrap();
        let back: Option<Note> = get_json(&cache, "note").await.unwrap();
        assert_eq!(back, Some(note));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let cache = MemoryCache::new();
        let value: Option<Note> = get_json(&cache, "missing").await.unwrap();
        assert!(value.is_none());
        assert!(!cache.delete("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entries_are_hidden_then_cleaned() {
        let cache = MemoryCache::new();
        let past = Instant::now() - Duration::from_millis(5);
        cache
            .insert_expiring_at("old", serde_json::json!(1), past)
            .await;
        cache
            .set("fresh", serde_json::json!(2), TtlClass::Long)
            .await
            .unwrap();

        assert_eq!(cache.get("old").await.unwrap(), None);
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.cleanup_expired().await, 1);
        assert_eq!(cache.get("fresh").await.unwrap(), Some(serde_json::json!(2)));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_serialization_error() {
        let cache = MemoryCache::new();
        cache
            .set("note", serde_json::json!([1, 2, 3]), TtlClass::Short)
            .await
            .unwrap();
        let result: Result<Option<Note>, _> = get_json(&cache, "note").await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[test]
    fn test_keys() {
        let id = SessionId::from("abc");
        assert_eq!(session_key(&id), "session:abc");
        assert_eq!(character_key(&id), "character:abc");
    }
}
