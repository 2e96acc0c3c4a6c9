//! Per-endpoint cache of the last successful GET response.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::debug;

use crate::storage::{keys, SharedStore};

/// A cached response body and when it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
  pub value: Value,
  pub cached_at: DateTime<Utc>,
}

/// Stores the last known-good body of each GET endpoint.
///
/// Entries are overwritten on every successful GET and never evicted. With a
/// TTL configured, entries older than the TTL are not served.
#[derive(Clone)]
pub struct ResponseCache {
  store: SharedStore,
  /// Entries older than this are treated as missing
  ttl: Option<Duration>,
}

impl ResponseCache {
  pub fn new(store: SharedStore) -> Self {
    Self { store, ttl: None }
  }

  /// Set the maximum age of entries that may be served.
  pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
    self.ttl = ttl;
    self
  }

  /// Check if an entry cached at `cached_at` is past the TTL.
  fn is_expired(&self, cached_at: DateTime<Utc>) -> bool {
    self.ttl.is_some_and(|ttl| Utc::now() - cached_at > ttl)
  }

  /// Record the body of a successful GET.
  pub fn store(&self, endpoint: &str, value: &Value) -> Result<()> {
    let serialized =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize response: {}", e))?;
    self.store.set(&keys::cache_key(endpoint), &serialized)
  }

  /// Look up the cached body for an endpoint.
  pub fn load(&self, endpoint: &str) -> Result<Option<CachedResponse>> {
    let Some(stored) = self.store.get(&keys::cache_key(endpoint))? else {
      return Ok(None);
    };

    if self.is_expired(stored.updated_at) {
      debug!(endpoint, cached_at = %stored.updated_at, "cached response expired");
      return Ok(None);
    }

    let value = serde_json::from_str(&stored.value)
      .map_err(|e| eyre!("Failed to parse cached response for {}: {}", endpoint, e))?;

    Ok(Some(CachedResponse {
      value,
      cached_at: stored.updated_at,
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::{KeyValueStore, MemoryStorage};
  use serde_json::json;
  use std::sync::Arc;

  #[test]
  fn test_round_trip_and_overwrite() {
    let cache = ResponseCache::new(Arc::new(MemoryStorage::new()));
    assert!(cache.load("/x").unwrap().is_none());

    cache.store("/x", &json!({ "v": 1 })).unwrap();
    assert_eq!(cache.load("/x").unwrap().unwrap().value, json!({ "v": 1 }));

    cache.store("/x", &json!({ "v": 2 })).unwrap();
    assert_eq!(cache.load("/x").unwrap().unwrap().value, json!({ "v": 2 }));
  }

  #[test]
  fn test_query_string_is_part_of_key() {
    let cache = ResponseCache::new(Arc::new(MemoryStorage::new()));
    cache.store("/deliveries/?page=1", &json!([1])).unwrap();

    assert!(cache.load("/deliveries/?page=2").unwrap().is_none());
    assert!(cache.load("/deliveries/").unwrap().is_none());
  }

  #[test]
  fn test_uses_cache_marker_key() {
    let store = Arc::new(MemoryStorage::new());
    let cache = ResponseCache::new(store.clone());
    cache.store("/profile/", &json!({ "id": 1 })).unwrap();

    assert!(store.get("/profile/_cache").unwrap().is_some());
  }

  #[test]
  fn test_ttl_expires_entries() {
    let store = Arc::new(MemoryStorage::new());

    let cache = ResponseCache::new(store.clone()).with_ttl(Some(Duration::zero()));
    cache.store("/x", &json!(1)).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert!(cache.load("/x").unwrap().is_none());

    // Without a TTL the same entry is still served
    let cache = ResponseCache::new(store);
    assert!(cache.load("/x").unwrap().is_some());
  }
}
