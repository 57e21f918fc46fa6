//! Cache storage trait plus SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Trait for cache storage backends.
///
/// A backend holds two slots per cache key: a fresh slot bound to an absolute
/// expiry and a stale slot with no expiry. An expired fresh slot reads as
/// absent; the backend is not required to erase it eagerly. The two writes in
/// `store` must be atomic so that an observer never sees slots from two
/// different fetches.
pub trait CacheStore: Send + Sync {
  /// Get the fresh slot, or `None` if it is missing or past its expiry.
  fn get_fresh<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>>;

  /// Get the stale slot regardless of age, or `None` if no successful store
  /// has happened since the last purge.
  fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>>;

  /// Write both slots from one fetch: fresh with the given expiry, stale
  /// without one.
  fn store<T: Serialize>(&self, key: &str, records: &[T], expires_at: DateTime<Utc>)
    -> Result<()>;

  /// Drop both slots unconditionally.
  fn purge(&self, key: &str) -> Result<()>;

  /// Get the settings digest recorded for this key, if any.
  fn get_settings_digest(&self, key: &str) -> Result<Option<String>>;

  /// Record the settings digest for this key.
  fn set_settings_digest(&self, key: &str, digest: &str) -> Result<()>;
}

/// In-memory storage, used by tests where persistence is not wanted.
#[derive(Default)]
#[allow(dead_code)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, MemoryEntry>>,
}

#[derive(Default)]
struct MemoryEntry {
  fresh: Option<(Vec<u8>, DateTime<Utc>)>,
  stale: Option<Vec<u8>>,
  digest: Option<String>,
}

impl MemoryStore {
  #[allow(dead_code)]
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>>> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStore for MemoryStore {
  fn get_fresh<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>> {
    let entries = self.lock()?;
    let Some((data, expires_at)) = entries.get(key).and_then(|e| e.fresh.as_ref()) else {
      return Ok(None);
    };
    if Utc::now() >= *expires_at {
      return Ok(None);
    }
    deserialize_records(data).map(Some)
  }

  fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>> {
    let entries = self.lock()?;
    match entries.get(key).and_then(|e| e.stale.as_ref()) {
      Some(data) => deserialize_records(data).map(Some),
      None => Ok(None),
    }
  }

  fn store<T: Serialize>(
    &self,
    key: &str,
    records: &[T],
    expires_at: DateTime<Utc>,
  ) -> Result<()> {
    let data = serialize_records(records)?;
    // Single critical section covers both slots.
    let mut entries = self.lock()?;
    let entry = entries.entry(key.to_string()).or_default();
    entry.fresh = Some((data.clone(), expires_at));
    entry.stale = Some(data);
    Ok(())
  }

  fn purge(&self, key: &str) -> Result<()> {
    let mut entries = self.lock()?;
    if let Some(entry) = entries.get_mut(key) {
      entry.fresh = None;
      entry.stale = None;
    }
    Ok(())
  }

  fn get_settings_digest(&self, key: &str) -> Result<Option<String>> {
    let entries = self.lock()?;
    Ok(entries.get(key).and_then(|e| e.digest.clone()))
  }

  fn set_settings_digest(&self, key: &str, digest: &str) -> Result<()> {
    let mut entries = self.lock()?;
    let entry = entries.entry(key.to_string()).or_default();
    entry.digest = Some(digest.to_string());
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Create a new SQLite store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Create a new SQLite store at the given path.
  pub fn open_at(path: &std::path::Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Create a store backed by an in-memory database.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("staffdir").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Two slots per cache key (records serialized as a JSON array).
-- expires_at is NULL for the stale slot.
CREATE TABLE IF NOT EXISTS directory_cache (
    cache_key TEXT NOT NULL,
    slot TEXT NOT NULL CHECK (slot IN ('fresh', 'stale')),
    data BLOB NOT NULL,
    expires_at TEXT,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (cache_key, slot)
);

-- Fingerprint of the settings each key was populated under.
CREATE TABLE IF NOT EXISTS cache_meta (
    cache_key TEXT PRIMARY KEY,
    settings_digest TEXT NOT NULL
);
"#;

impl CacheStore for SqliteStore {
  fn get_fresh<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, Option<String>)> = conn
      .query_row(
        "SELECT data, expires_at FROM directory_cache WHERE cache_key = ? AND slot = 'fresh'",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read fresh slot: {}", e))?;

    let Some((data, expires_at)) = row else {
      return Ok(None);
    };
    let expires_at = expires_at.ok_or_else(|| eyre!("Fresh slot is missing its expiry"))?;
    if Utc::now() >= parse_datetime(&expires_at)? {
      return Ok(None);
    }
    deserialize_records(&data).map(Some)
  }

  fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM directory_cache WHERE cache_key = ? AND slot = 'stale'",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read stale slot: {}", e))?;

    match data {
      Some(data) => deserialize_records(&data).map(Some),
      None => Ok(None),
    }
  }

  fn store<T: Serialize>(
    &self,
    key: &str,
    records: &[T],
    expires_at: DateTime<Utc>,
  ) -> Result<()> {
    let data = serialize_records(records)?;
    let now = Utc::now().to_rfc3339();

    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // One transaction covers both slots.
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO directory_cache (cache_key, slot, data, expires_at, stored_at)
       VALUES (?, 'fresh', ?, ?, ?)",
      params![key, data, expires_at.to_rfc3339(), now],
    )
    .map_err(|e| eyre!("Failed to write fresh slot: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO directory_cache (cache_key, slot, data, expires_at, stored_at)
       VALUES (?, 'stale', ?, NULL, ?)",
      params![key, data, now],
    )
    .map_err(|e| eyre!("Failed to write stale slot: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn purge(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM directory_cache WHERE cache_key = ?",
        params![key],
      )
      .map_err(|e| eyre!("Failed to purge cache: {}", e))?;

    Ok(())
  }

  fn get_settings_digest(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT settings_digest FROM cache_meta WHERE cache_key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read settings digest: {}", e))
  }

  fn set_settings_digest(&self, key: &str, digest: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_meta (cache_key, settings_digest) VALUES (?, ?)",
        params![key, digest],
      )
      .map_err(|e| eyre!("Failed to store settings digest: {}", e))?;

    Ok(())
  }
}

fn serialize_records<T: Serialize>(records: &[T]) -> Result<Vec<u8>> {
  serde_json::to_vec(records).map_err(|e| eyre!("Failed to serialize records: {}", e))
}

fn deserialize_records<T: DeserializeOwned>(data: &[u8]) -> Result<Vec<T>> {
  serde_json::from_slice(data).map_err(|e| eyre!("Failed to deserialize cached records: {}", e))
}

/// Parse an RFC 3339 datetime as stored by `store`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;
  use serde::Deserialize;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Row {
    name: String,
  }

  fn row(name: &str) -> Row {
    Row {
      name: name.to_string(),
    }
  }

  #[test]
  fn sqlite_store_round_trips_both_slots() {
    let store = SqliteStore::open_in_memory().unwrap();
    let expires = Utc::now() + Duration::minutes(5);

    store.store("k", &[row("alice")], expires).unwrap();

    let fresh: Option<Vec<Row>> = store.get_fresh("k").unwrap();
    let stale: Option<Vec<Row>> = store.get_stale("k").unwrap();
    assert_eq!(fresh, Some(vec![row("alice")]));
    assert_eq!(stale, Some(vec![row("alice")]));
  }

  #[test]
  fn sqlite_expired_fresh_slot_reads_as_absent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let expires = Utc::now() - Duration::seconds(1);

    store.store("k", &[row("alice")], expires).unwrap();

    let fresh: Option<Vec<Row>> = store.get_fresh("k").unwrap();
    let stale: Option<Vec<Row>> = store.get_stale("k").unwrap();
    assert_eq!(fresh, None);
    // The stale slot ignores expiry entirely.
    assert_eq!(stale, Some(vec![row("alice")]));
  }

  #[test]
  fn sqlite_purge_drops_both_slots() {
    let store = SqliteStore::open_in_memory().unwrap();
    let expires = Utc::now() + Duration::minutes(5);
    store.store("k", &[row("alice")], expires).unwrap();

    store.purge("k").unwrap();

    let fresh: Option<Vec<Row>> = store.get_fresh("k").unwrap();
    let stale: Option<Vec<Row>> = store.get_stale("k").unwrap();
    assert_eq!(fresh, None);
    assert_eq!(stale, None);
  }

  #[test]
  fn sqlite_keys_are_independent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let expires = Utc::now() + Duration::minutes(5);
    store.store("a", &[row("alice")], expires).unwrap();
    store.store("b", &[row("bob")], expires).unwrap();

    store.purge("a").unwrap();

    let a: Option<Vec<Row>> = store.get_stale("a").unwrap();
    let b: Option<Vec<Row>> = store.get_stale("b").unwrap();
    assert_eq!(a, None);
    assert_eq!(b, Some(vec![row("bob")]));
  }

  #[test]
  fn sqlite_empty_record_list_is_present_not_absent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let expires = Utc::now() + Duration::minutes(5);
    store.store("k", &Vec::<Row>::new(), expires).unwrap();

    let fresh: Option<Vec<Row>> = store.get_fresh("k").unwrap();
    assert_eq!(fresh, Some(vec![]));
  }

  #[test]
  fn sqlite_settings_digest_round_trip() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert_eq!(store.get_settings_digest("k").unwrap(), None);

    store.set_settings_digest("k", "abc123").unwrap();
    assert_eq!(store.get_settings_digest("k").unwrap(), Some("abc123".into()));

    store.set_settings_digest("k", "def456").unwrap();
    assert_eq!(store.get_settings_digest("k").unwrap(), Some("def456".into()));
  }

  #[test]
  fn memory_store_matches_sqlite_semantics() {
    let store = MemoryStore::new();
    let expires = Utc::now() + Duration::minutes(5);

    store.store("k", &[row("alice")], expires).unwrap();
    let fresh: Option<Vec<Row>> = store.get_fresh("k").unwrap();
    assert_eq!(fresh, Some(vec![row("alice")]));

    store.purge("k").unwrap();
    let fresh: Option<Vec<Row>> = store.get_fresh("k").unwrap();
    let stale: Option<Vec<Row>> = store.get_stale("k").unwrap();
    assert_eq!(fresh, None);
    assert_eq!(stale, None);
  }
}
