//! Named-blob persistence for dataset snapshots and results documents.
//!
//! Every backend implements [`BlobStore`]: existence check, read, and a write that refuses
//! to replace an existing blob unless asked to.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

pub mod dataset;
pub mod fs;

pub use dataset::{DatasetCache, DatasetSnapshot};
pub use fs::FsBlobStore;

/// Project-local state directory, relative to the project root.
pub const STATE_DIR: &str = ".evalflow";
pub const DATASETS_DIR: &str = "datasets";
pub const RESULTS_DIR: &str = "results";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid blob key '{0}'")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("malformed blob '{key}': {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write `bytes` under `key`. Returns `false` without writing when the key is
    /// already present and `overwrite` is not set.
    async fn put(&self, key: &str, bytes: &[u8], overwrite: bool) -> Result<bool>;
}

/// Keys become file names in some backends, so path separators and dot-segments are rejected.
pub fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0');
    if bad {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// SQLite-backed blob table, for runs that prefer a single database file over a directory.
#[derive(Debug, Clone)]
pub struct SqliteBlobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBlobStore {
    /// Open a new store at the given path (e.g., "evalflow.db")
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS blobs (
                name TEXT PRIMARY KEY,
                updated_at TEXT NOT NULL,
                content BLOB NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let key = key.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row("SELECT 1 FROM blobs WHERE name = ?1", params![key], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let key = key.to_string();
        self.with_conn(move |conn| {
            let content = conn
                .query_row(
                    "SELECT content FROM blobs WHERE name = ?1",
                    params![key],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(content)
        })
        .await
    }

    async fn put(&self, key: &str, bytes: &[u8], overwrite: bool) -> Result<bool> {
        validate_key(key)?;
        let key = key.to_string();
        let bytes = bytes.to_vec();
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let changed = if overwrite {
                conn.execute(
                    "INSERT INTO blobs (name, updated_at, content) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET updated_at = excluded.updated_at, content = excluded.content",
                    params![key, now, bytes],
                )?
            } else {
                conn.execute(
                    "INSERT OR IGNORE INTO blobs (name, updated_at, content) VALUES (?1, ?2, ?3)",
                    params![key, now, bytes],
                )?
            };
            Ok(changed > 0)
        })
        .await
    }
}

/// Process-local store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: tokio::sync::RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.blobs.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8], overwrite: bool) -> Result<bool> {
        validate_key(key)?;
        let mut blobs = self.blobs.write().await;
        if !overwrite && blobs.contains_key(key) {
            return Ok(false);
        }
        blobs.insert(key.to_string(), bytes.to_vec());
        Ok(true)
    }
}
