//! SQLite implementation of [`KeyValueStore`].

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{KeyValueStore, StoredValue, UpdateFn};

/// SQLite-based key-value storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the storage at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open storage database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("courier").join("store.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run storage migrations: {}", e))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

impl KeyValueStore for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<StoredValue>> {
    let conn = self.lock()?;

    let row: Option<(String, String)> = conn
      .query_row(
        "SELECT value, updated_at FROM kv_store WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read key '{}': {}", key, e))?;

    row
      .map(|(value, updated_at)| {
        Ok(StoredValue {
          value,
          updated_at: parse_datetime(&updated_at)?,
        })
      })
      .transpose()
  }

  fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
    let mut conn = self.lock()?;
    let now = Utc::now().to_rfc3339();

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, value) in entries {
      tx.execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
        params![key, value, now],
      )
      .map_err(|e| eyre!("Failed to write key '{}': {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn set_many_if(&self, guard: (&str, &str), entries: &[(&str, &str)]) -> Result<bool> {
    let mut conn = self.lock()?;
    let now = Utc::now().to_rfc3339();

    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let (guard_key, expected) = guard;
    let current: Option<String> = tx
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![guard_key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read key '{}': {}", guard_key, e))?;

    if current.as_deref() != Some(expected) {
      return Ok(false);
    }

    for (key, value) in entries {
      tx.execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
        params![key, value, now],
      )
      .map_err(|e| eyre!("Failed to write key '{}': {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(true)
  }

  fn remove_many(&self, keys: &[&str]) -> Result<()> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for key in keys {
      tx.execute("DELETE FROM kv_store WHERE key = ?", params![key])
        .map_err(|e| eyre!("Failed to remove key '{}': {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<()> {
    let mut conn = self.lock()?;

    // IMMEDIATE takes the write lock up front, so another process sharing the
    // file cannot interleave between our read and write.
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let current: Option<String> = tx
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read key '{}': {}", key, e))?;

    // Dropping `tx` on error rolls back.
    match apply(current.as_deref())? {
      Some(value) => {
        tx.execute(
          "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
          params![key, value, Utc::now().to_rfc3339()],
        )
        .map_err(|e| eyre!("Failed to write key '{}': {}", key, e))?;
      }
      None => {
        tx.execute("DELETE FROM kv_store WHERE key = ?", params![key])
          .map_err(|e| eyre!("Failed to remove key '{}': {}", key, e))?;
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }
}

/// Parse an RFC 3339 timestamp stored alongside a value.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
