//! SQLite implementation of cache storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::traits::{CacheStorage, StoreName};
use crate::error::StoreError;
use crate::http::ResponseSnapshot;

/// SQLite-based cache storage implementation.
///
/// The connection sits behind a mutex, so all writes serialize. Queries
/// run on the blocking pool to keep the async executor free.
#[derive(Clone)]
pub struct SqliteStorage {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
  /// Open or create the database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private database that lives as long as this value.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cellar").join("cache.db"))
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Run `f` against the connection on the blocking pool.
  async fn with_conn<T, F>(&self, label: String, f: F) -> Result<T, StoreError>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection, &str) -> Result<T, StoreError> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    let task_label = label.clone();

    tokio::task::spawn_blocking(move || {
      let mut conn = conn
        .lock()
        .map_err(|e| StoreError::unavailable(&task_label, format!("Lock poisoned: {}", e)))?;
      f(&mut conn, &task_label)
    })
    .await
    .map_err(|e| StoreError::unavailable(label, e))?
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named, versioned stores
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY,
    role TEXT NOT NULL,
    version TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request
CREATE TABLE IF NOT EXISTS entries (
    store TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    captured_at TEXT NOT NULL,
    PRIMARY KEY (store, key_hash),
    FOREIGN KEY (store) REFERENCES stores(name) ON DELETE CASCADE
);

-- Deleted store names; only an explicit open brings one back
CREATE TABLE IF NOT EXISTS deleted_stores (
    name TEXT PRIMARY KEY
);
"#;

#[async_trait]
impl CacheStorage for SqliteStorage {
  async fn open(&self, store: &StoreName) -> Result<bool, StoreError> {
    let store = store.clone();
    self
      .with_conn(store.to_string(), move |conn, label| {
        let tx = conn.transaction().map_err(|e| sqlite_error(label, e))?;
        tx.execute("DELETE FROM deleted_stores WHERE name = ?", params![label])
          .map_err(|e| sqlite_error(label, e))?;
        let created = insert_store(&tx, &store).map_err(|e| sqlite_error(label, e))?;
        tx.commit().map_err(|e| sqlite_error(label, e))?;
        Ok(created)
      })
      .await
  }

  async fn read(&self, store: &StoreName, key: &str) -> Result<Option<ResponseSnapshot>, StoreError> {
    let hash = key_hash(key);
    self
      .with_conn(store.to_string(), move |conn, label| {
        let row: Option<(i64, String, Vec<u8>, String)> = conn
          .query_row(
            "SELECT status, headers, body, captured_at FROM entries
             WHERE store = ? AND key_hash = ?",
            params![label, hash],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
          )
          .optional()
          .map_err(|e| sqlite_error(label, e))?;

        match row {
          Some((status, headers, body, captured_at)) => {
            let status = u16::try_from(status)
              .map_err(|_| StoreError::unavailable(label, format!("Corrupt status {}", status)))?;
            let headers: Vec<(String, String)> = serde_json::from_str(&headers)
              .map_err(|e| StoreError::unavailable(label, format!("Corrupt headers: {}", e)))?;
            let captured_at = parse_datetime(&captured_at).map_err(|e| StoreError::unavailable(label, e))?;

            Ok(Some(ResponseSnapshot {
              status,
              headers,
              body,
              captured_at,
            }))
          }
          None => Ok(None),
        }
      })
      .await
  }

  async fn write(
    &self,
    store: &StoreName,
    key: &str,
    snapshot: &ResponseSnapshot,
  ) -> Result<(), StoreError> {
    let entries = vec![(key.to_string(), snapshot.clone())];
    self.write_all(store, &entries).await
  }

  async fn write_all(
    &self,
    store: &StoreName,
    entries: &[(String, ResponseSnapshot)],
  ) -> Result<(), StoreError> {
    let store = store.clone();
    let entries = entries.to_vec();

    self
      .with_conn(store.to_string(), move |conn, label| {
        let tx = conn.transaction().map_err(|e| sqlite_error(label, e))?;
        let deleted: bool = tx
          .query_row(
            "SELECT EXISTS(SELECT 1 FROM deleted_stores WHERE name = ?)",
            params![label],
            |row| row.get(0),
          )
          .map_err(|e| sqlite_error(label, e))?;
        if deleted {
          return Err(StoreError::Deleted {
            store: label.to_string(),
          });
        }
        insert_store(&tx, &store).map_err(|e| sqlite_error(label, e))?;

        for (key, snapshot) in &entries {
          let headers = serde_json::to_string(&snapshot.headers)
            .map_err(|e| StoreError::unavailable(label, format!("Failed to serialize headers: {}", e)))?;

          tx.execute(
            "INSERT OR REPLACE INTO entries (store, key_hash, request_key, status, headers, body, captured_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
              label,
              key_hash(key),
              key,
              snapshot.status,
              headers,
              snapshot.body,
              snapshot.captured_at.to_rfc3339()
            ],
          )
          .map_err(|e| sqlite_error(label, e))?;
        }

        // Dropping an uncommitted transaction rolls the whole batch back
        tx.commit().map_err(|e| sqlite_error(label, e))
      })
      .await
  }

  async fn entry_count(&self, store: &StoreName) -> Result<Option<usize>, StoreError> {
    self
      .with_conn(store.to_string(), move |conn, label| {
        let exists: bool = conn
          .query_row(
            "SELECT EXISTS(SELECT 1 FROM stores WHERE name = ?)",
            params![label],
            |row| row.get(0),
          )
          .map_err(|e| sqlite_error(label, e))?;
        if !exists {
          return Ok(None);
        }

        let count: i64 = conn
          .query_row(
            "SELECT COUNT(*) FROM entries WHERE store = ?",
            params![label],
            |row| row.get(0),
          )
          .map_err(|e| sqlite_error(label, e))?;

        Ok(Some(count as usize))
      })
      .await
  }

  async fn delete(&self, store: &StoreName) -> Result<bool, StoreError> {
    self
      .with_conn(store.to_string(), move |conn, label| {
        let tx = conn.transaction().map_err(|e| sqlite_error(label, e))?;
        tx.execute("DELETE FROM entries WHERE store = ?", params![label])
          .map_err(|e| sqlite_error(label, e))?;
        let removed = tx
          .execute("DELETE FROM stores WHERE name = ?", params![label])
          .map_err(|e| sqlite_error(label, e))?;
        tx.execute(
          "INSERT OR IGNORE INTO deleted_stores (name) VALUES (?)",
          params![label],
        )
        .map_err(|e| sqlite_error(label, e))?;
        tx.commit().map_err(|e| sqlite_error(label, e))?;
        Ok(removed > 0)
      })
      .await
  }

  async fn list(&self) -> Result<Vec<StoreName>, StoreError> {
    self
      .with_conn("*".to_string(), move |conn, label| {
        let mut stmt = conn
          .prepare("SELECT name FROM stores ORDER BY name")
          .map_err(|e| sqlite_error(label, e))?;

        let names = stmt
          .query_map([], |row| row.get::<_, String>(0))
          .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
          .map_err(|e| sqlite_error(label, e))?;

        Ok(
          names
            .iter()
            .filter_map(|n| {
              let parsed = StoreName::parse(n);
              if parsed.is_none() {
                tracing::warn!(store = %n, "Ignoring store with unrecognized name");
              }
              parsed
            })
            .collect(),
        )
      })
      .await
  }
}

fn insert_store(conn: &Connection, store: &StoreName) -> rusqlite::Result<bool> {
  let inserted = conn.execute(
    "INSERT OR IGNORE INTO stores (name, role, version) VALUES (?, ?, ?)",
    params![store.to_string(), store.role.as_str(), store.version],
  )?;
  Ok(inserted > 0)
}

/// SHA256 hash for stable, fixed-length keys
fn key_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

fn sqlite_error(store: &str, e: rusqlite::Error) -> StoreError {
  if let rusqlite::Error::SqliteFailure(err, _) = &e {
    if err.code == rusqlite::ErrorCode::DiskFull {
      return StoreError::QuotaExceeded {
        store: store.to_string(),
      };
    }
  }
  StoreError::unavailable(store, e)
}

/// Parse an RFC 3339 capture timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| format!("Failed to parse datetime '{}': {}", s, e))
}
