//! Durable key-value storage used by the network layer.
//!
//! Everything the client persists goes through [`KeyValueStore`]: the
//! credential pair, the cached user profile, per-endpoint response bodies and
//! the serialized mutation queue. The key layout is fixed in [`keys`].

mod memory;
mod sqlite;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Storage keys shared by every component.
pub mod keys {
  /// Current access token.
  pub const USER_TOKEN: &str = "userToken";
  /// Current refresh token.
  pub const REFRESH_TOKEN: &str = "refreshToken";
  /// Cached profile of the signed-in user.
  pub const USER_DATA: &str = "userData";
  /// Serialized mutation queue.
  pub const OFFLINE_QUEUE: &str = "offlineDeliveries";
  /// Suffix appended to an endpoint to form its response cache key.
  pub const CACHE_SUFFIX: &str = "_cache";

  /// Response cache key for an endpoint (including its query string).
  pub fn cache_key(endpoint: &str) -> String {
    format!("{}{}", endpoint, CACHE_SUFFIX)
  }
}

/// A stored value together with the time it was last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
  pub value: String,
  pub updated_at: DateTime<Utc>,
}

/// Callback used by [`KeyValueStore::update`].
///
/// Receives the current value (if any) and returns the value to write back,
/// or `None` to delete the key.
pub type UpdateFn<'a> = dyn FnMut(Option<&str>) -> Result<Option<String>> + 'a;

/// Trait for durable key-value storage backends.
pub trait KeyValueStore: Send + Sync {
  /// Read a single key.
  fn get(&self, key: &str) -> Result<Option<StoredValue>>;

  /// Write several keys as one atomic operation.
  fn set_many(&self, entries: &[(&str, &str)]) -> Result<()>;

  /// Write several keys as one atomic operation, but only while `guard.0`
  /// holds exactly `guard.1`. Returns whether the write happened.
  fn set_many_if(&self, guard: (&str, &str), entries: &[(&str, &str)]) -> Result<bool>;

  /// Remove several keys as one atomic operation. Missing keys are ignored.
  fn remove_many(&self, keys: &[&str]) -> Result<()>;

  /// Atomic read-modify-write of a single key.
  ///
  /// Concurrent updates of the same key are serialized, so no update is lost.
  /// If `apply` fails, the stored value is left untouched.
  fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<()>;

  /// Write a single key.
  fn set(&self, key: &str, value: &str) -> Result<()> {
    self.set_many(&[(key, value)])
  }

  /// Remove a single key.
  fn remove(&self, key: &str) -> Result<()> {
    self.remove_many(&[key])
  }
}

/// Storage handle shared between the client components.
pub type SharedStore = Arc<dyn KeyValueStore>;
