// Path: crates/storage/src/kv.rs
use crate::error::{backend, StorageError};
use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use std::path::Path;
use std::sync::Arc;

/// ---- Table definitions (single DB, prefix-encoded string keys) ----
const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("KV");

/// A string-keyed byte store. Clones share the same database handle.
#[derive(Clone)]
pub struct KvStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").finish_non_exhaustive()
    }
}

impl KvStore {
    /// Opens (or creates) the database file at `path`. Parent directories are created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(backend)?;
            }
        }
        let db = Database::create(path).map_err(backend)?;

        // Ensure tables exist
        {
            let w = db.begin_write().map_err(backend)?;
            {
                w.open_table(KV).map_err(backend)?;
            }
            w.commit().map_err(backend)?;
        }
        tracing::debug!(target: "storage", path = %path.display(), "opened local index");
        Ok(Self { db: Arc::new(db) })
    }

    fn read_txn(&self) -> Result<ReadTransaction<'_>, StorageError> {
        self.db.begin_read().map_err(backend)
    }
    fn write_txn(&self) -> Result<WriteTransaction<'_>, StorageError> {
        self.db.begin_write().map_err(backend)
    }

    /// Reads the value under `key`.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let r = self.read_txn()?;
        let table = r.open_table(KV).map_err(backend)?;
        let value = table.get(key).map_err(backend)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// Writes `value` under `key`, replacing any previous value.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let w = self.write_txn()?;
        {
            let mut table = w.open_table(KV).map_err(backend)?;
            table.insert(key, value).map_err(backend)?;
        }
        w.commit().map_err(backend)
    }

    /// Removes `key`. Missing keys are not an error.
    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        let w = self.write_txn()?;
        {
            let mut table = w.open_table(KV).map_err(backend)?;
            table.remove(key).map_err(backend)?;
        }
        w.commit().map_err(backend)
    }

    /// Removes every key in `keys` in one transaction.
    pub fn delete_many(&self, keys: &[String]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        let w = self.write_txn()?;
        {
            let mut table = w.open_table(KV).map_err(backend)?;
            for key in keys {
                table.remove(key.as_str()).map_err(backend)?;
            }
        }
        w.commit().map_err(backend)
    }

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let r = self.read_txn()?;
        let table = r.open_table(KV).map_err(backend)?;
        let mut out = Vec::new();
        for entry in table.range(prefix..).map_err(backend)? {
            let (k, v) = entry.map_err(backend)?;
            let key = k.value();
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_string(), v.value().to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_and_scan() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path().join("nested/index.redb")).unwrap();

        kv.put("a-1", b"one").unwrap();
        kv.put("a-2", b"two").unwrap();
        kv.put("b-1", b"other").unwrap();
        assert_eq!(kv.get("a-1").unwrap().as_deref(), Some(&b"one"[..]));
        assert!(kv.has("b-1").unwrap());
        assert!(!kv.has("c").unwrap());

        let scanned = kv.scan_prefix("a-").unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, "a-1");

        kv.delete("a-1").unwrap();
        kv.delete("missing").unwrap();
        assert_eq!(kv.scan_prefix("a-").unwrap().len(), 1);

        kv.delete_many(&["a-2".to_string(), "b-1".to_string()]).unwrap();
        assert!(kv.scan_prefix("").unwrap().is_empty());
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.redb");
        {
            let kv = KvStore::open(&path).unwrap();
            kv.put("k", b"v").unwrap();
        }
        let kv = KvStore::open(&path).unwrap();
        assert_eq!(kv.get("k").unwrap().as_deref(), Some(&b"v"[..]));
    }
}
