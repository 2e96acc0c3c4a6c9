//! In-process [`KeyValueStore`] with no durability.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{KeyValueStore, StoredValue, UpdateFn};

/// Storage that keeps everything in a map.
/// Used when no durable storage is wanted, and in tests.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KeyValueStore for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<StoredValue>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let now = Utc::now();
    for (key, value) in pairs {
      entries.insert(
        key.to_string(),
        StoredValue {
          value: value.to_string(),
          updated_at: now,
        },
      );
    }
    Ok(())
  }

  fn set_many_if(&self, guard: (&str, &str), pairs: &[(&str, &str)]) -> Result<bool> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let (guard_key, expected) = guard;
    if entries.get(guard_key).map(|stored| stored.value.as_str()) != Some(expected) {
      return Ok(false);
    }
    let now = Utc::now();
    for (key, value) in pairs {
      entries.insert(
        key.to_string(),
        StoredValue {
          value: value.to_string(),
          updated_at: now,
        },
      );
    }
    Ok(true)
  }

  fn remove_many(&self, keys: &[&str]) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    for key in keys {
      entries.remove(*key);
    }
    Ok(())
  }

  fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let current = entries.get(key).map(|stored| stored.value.as_str());
    match apply(current)? {
      Some(value) => {
        entries.insert(
          key.to_string(),
          StoredValue {
            value,
            updated_at: Utc::now(),
          },
        );
      }
      None => {
        entries.remove(key);
      }
    }
    Ok(())
  }
}
