//! Snapshot persistence
//!
//! The engine never performs I/O itself. Hosts hand an [`EngineSnapshot`] to a
//! [`SnapshotStore`], which maps a key to the snapshot's JSON encoding.
//!
//! # Column Families
//!
//! - `snapshots` - Session snapshots (key: snapshot key, value: JSON)
//! - `meta` - Bookkeeping (key: `<snapshot key>/saved_at`, value: RFC 3339)

use crate::{
    error::{Error, Result},
    snapshot::EngineSnapshot,
    Config,
};
use parking_lot::RwLock;
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Column family names
const CF_SNAPSHOTS: &str = "snapshots";
const CF_META: &str = "meta";

/// Key-value store for session snapshots
pub trait SnapshotStore: Send + Sync {
    /// Persist `snapshot` under `key`, replacing any previous value
    fn save(&self, key: &str, snapshot: &EngineSnapshot) -> Result<()>;

    /// Load the snapshot stored under `key`
    fn load(&self, key: &str) -> Result<Option<EngineSnapshot>>;

    /// Remove the snapshot stored under `key`
    fn delete(&self, key: &str) -> Result<()>;
}

/// RocksDB-backed snapshot store
pub struct RocksSnapshotStore {
    db: Arc<DB>,
}

impl fmt::Debug for RocksSnapshotStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocksSnapshotStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl RocksSnapshotStore {
    /// Open or create the database under `config.data_dir`
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_SNAPSHOTS, Self::cf_options_snapshots()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened snapshot store");

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options_snapshots() -> Options {
        let mut opts = Options::default();
        // Snapshots are large, repetitive JSON
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// When the snapshot under `key` was last saved
    pub fn saved_at(&self, key: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        let cf = self.cf_handle(CF_META)?;
        let value = match self.db.get_cf(&cf, Self::saved_at_key(key))? {
            Some(value) => value,
            None => return Ok(None),
        };

        let text = String::from_utf8(value)
            .map_err(|e| Error::Storage(format!("corrupt saved_at for {}: {}", key, e)))?;
        let parsed = chrono::DateTime::parse_from_rfc3339(&text)
            .map_err(|e| Error::Storage(format!("corrupt saved_at for {}: {}", key, e)))?;
        Ok(Some(parsed.with_timezone(&chrono::Utc)))
    }

    fn saved_at_key(key: &str) -> Vec<u8> {
        format!("{}/saved_at", key).into_bytes()
    }
}

impl SnapshotStore for RocksSnapshotStore {
    fn save(&self, key: &str, snapshot: &EngineSnapshot) -> Result<()> {
        let value = snapshot.to_bytes()?;
        let cf_snapshots = self.cf_handle(CF_SNAPSHOTS)?;
        let cf_meta = self.cf_handle(CF_META)?;

        // Snapshot and its timestamp land together
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_snapshots, key.as_bytes(), &value);
        batch.put_cf(
            &cf_meta,
            Self::saved_at_key(key),
            chrono::Utc::now().to_rfc3339().as_bytes(),
        );
        self.db.write(batch)?;

        tracing::debug!(key, bytes = value.len(), "Snapshot saved");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<EngineSnapshot>> {
        let cf = self.cf_handle(CF_SNAPSHOTS)?;
        match self.db.get_cf(&cf, key.as_bytes())? {
            Some(value) => Ok(Some(EngineSnapshot::from_bytes(&value)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let cf_snapshots = self.cf_handle(CF_SNAPSHOTS)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_snapshots, key.as_bytes());
        batch.delete_cf(&cf_meta, Self::saved_at_key(key));
        self.db.write(batch)?;
        Ok(())
    }
}

/// In-memory snapshot store for tests and ephemeral sessions. Values are
/// stored JSON-encoded, like the RocksDB store.
#[derive(Debug, Default, Clone)]
pub struct MemorySnapshotStore {
    inner: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemorySnapshotStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, key: &str, snapshot: &EngineSnapshot) -> Result<()> {
        let value = snapshot.to_bytes()?;
        self.inner.write().insert(key.to_string(), value);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<EngineSnapshot>> {
        match self.inner.read().get(key) {
            Some(value) => Ok(Some(EngineSnapshot::from_bytes(value)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.write().remove(key);
        Ok(())
    }
}
