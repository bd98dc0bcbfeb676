//! ReDB storage implementation.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, TableDefinition};

use crate::error::{AgeGateError, AgeGateResult};

// String keys, raw byte values
const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Storage wrapper for ReDB.
///
/// Thread-safe via internal Arc. Clone is cheap.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Open or create a database at the given path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: &Path) -> AgeGateResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(|e| AgeGateError::Storage(e.to_string()))?;
        Self::init(&db)?;

        tracing::info!(path = %path.display(), "Opened storage database");

        Ok(Self { db: Arc::new(db) })
    }

    /// Open a non-persistent database.
    ///
    /// Used when no cache path is configured, and by tests.
    pub fn open_memory() -> AgeGateResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| AgeGateError::Storage(e.to_string()))?;
        Self::init(&db)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn init(db: &Database) -> AgeGateResult<()> {
        let write_txn = db.begin_write()?;
        {
            // Opening the table creates it
            let _ = write_txn.open_table(KV)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn put(&self, key: &str, value: &[u8]) -> AgeGateResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        tracing::debug!(key, len = value.len(), "Stored value");
        Ok(())
    }

    /// Fetch the value under `key`.
    pub fn get(&self, key: &str) -> AgeGateResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KV)?;

        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Remove `key`. Returns whether a value was present.
    pub fn delete(&self, key: &str) -> AgeGateResult<bool> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(KV)?;
            table.remove(key)?.is_some()
        };
        write_txn.commit()?;

        if deleted {
            tracing::debug!(key, "Deleted value");
        }
        Ok(deleted)
    }
}
