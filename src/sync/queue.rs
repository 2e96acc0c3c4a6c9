//! Durable FIFO queue of writes recorded while offline.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::net::HttpMethod;
use crate::storage::{keys, SharedStore};

/// A write not yet confirmed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
  pub id: String,
  pub endpoint: String,
  pub method: HttpMethod,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<Value>,
  /// When the write was attempted (RFC 3339)
  pub timestamp: String,
  /// Failed replay attempts so far
  #[serde(default)]
  pub attempts: u32,
}

impl QueuedMutation {
  pub fn new(endpoint: impl Into<String>, method: HttpMethod, body: Option<Value>) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      endpoint: endpoint.into(),
      method,
      body,
      timestamp: Utc::now().to_rfc3339(),
      attempts: 0,
    }
  }
}

/// Ordered queue persisted as a single JSON array.
///
/// Every change is an atomic read-modify-write on the backing store, so
/// concurrent enqueues cannot drop each other's entries.
#[derive(Clone)]
pub struct MutationQueue {
  store: SharedStore,
}

impl MutationQueue {
  pub fn new(store: SharedStore) -> Self {
    Self { store }
  }

  /// Append a mutation.
  pub fn enqueue(&self, mutation: QueuedMutation) -> Result<()> {
    debug!(id = %mutation.id, method = %mutation.method, endpoint = %mutation.endpoint, "queueing mutation");
    let mut pending = Some(mutation);
    self.modify(|queue| {
      if let Some(mutation) = pending.take() {
        queue.push(mutation);
      }
    })
  }

  /// All pending mutations in insertion order.
  pub fn list(&self) -> Result<Vec<QueuedMutation>> {
    match self.store.get(keys::OFFLINE_QUEUE)? {
      Some(stored) => decode(Some(&stored.value)),
      None => Ok(Vec::new()),
    }
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.list()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.list()?.is_empty())
  }

  /// Remove the mutations with the given ids, keeping the order of the rest.
  pub fn remove_many(&self, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
      return Ok(());
    }
    let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
    self.modify(|queue| queue.retain(|m| !ids.contains(m.id.as_str())))
  }

  /// Count one more failed replay for each id.
  ///
  /// With a `max_attempts` budget, mutations that reach it are removed and
  /// returned.
  pub fn record_failures(
    &self,
    ids: &[String],
    max_attempts: Option<u32>,
  ) -> Result<Vec<QueuedMutation>> {
    let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut dropped = Vec::new();

    self.modify(|queue| {
      dropped.clear();
      for mutation in queue.iter_mut() {
        if ids.contains(mutation.id.as_str()) {
          mutation.attempts += 1;
        }
      }
      if let Some(max) = max_attempts {
        let (exhausted, kept): (Vec<_>, Vec<_>) = std::mem::take(queue)
          .into_iter()
          .partition(|m| ids.contains(m.id.as_str()) && m.attempts >= max);
        *queue = kept;
        dropped = exhausted;
      }
    })?;

    for mutation in &dropped {
      warn!(
        id = %mutation.id,
        method = %mutation.method,
        endpoint = %mutation.endpoint,
        attempts = mutation.attempts,
        "dropping mutation after exhausting retry budget"
      );
    }

    Ok(dropped)
  }

  /// Remove every pending mutation.
  pub fn clear(&self) -> Result<()> {
    self.store.remove(keys::OFFLINE_QUEUE)
  }

  fn modify(&self, mut change: impl FnMut(&mut Vec<QueuedMutation>)) -> Result<()> {
    self.store.update(keys::OFFLINE_QUEUE, &mut |current| {
      let mut queue = decode(current)?;
      change(&mut queue);
      if queue.is_empty() {
        return Ok(None);
      }
      let encoded = serde_json::to_string(&queue)
        .map_err(|e| eyre!("Failed to serialize mutation queue: {}", e))?;
      Ok(Some(encoded))
    })
  }
}

fn decode(raw: Option<&str>) -> Result<Vec<QueuedMutation>> {
  match raw {
    Some(raw) => {
      serde_json::from_str(raw).map_err(|e| eyre!("Failed to parse mutation queue: {}", e))
    }
    None => Ok(Vec::new()),
  }
}
