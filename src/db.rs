//! RocksDB wrapper shared by the three persistent stores
//!
//! One database, one column family per logical store:
//! - `changes`: per-name change logs, keyed by raw name bytes
//! - `trie_nodes`: serialized trie nodes, keyed by node hash
//! - `commits`: the commit list under a single key
//! - `meta`: the node manager's scheduler table under a single key

use std::path::{Path, PathBuf};

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, MultiThreaded, Options, WriteBatch, WriteOptions,
};
use tracing::{error, info};

use crate::error::{Error, Result};

/// Column family for per-name change logs.
pub const CF_CHANGES: &str = "changes";

/// Column family for serialized trie nodes.
pub const CF_TRIE_NODES: &str = "trie_nodes";

/// Column family for the commit list.
pub const CF_COMMITS: &str = "commits";

/// Column family for the node manager's side-store.
pub const CF_META: &str = "meta";

/// All column family names.
pub const COLUMN_FAMILIES: &[&str] = &[CF_CHANGES, CF_TRIE_NODES, CF_COMMITS, CF_META];

/// RocksDB database wrapper.
///
/// Owns the handle, the shared block cache, and the fsync write options.
/// Writes within a block are synchronous; trie node writes go through an
/// atomic [`WriteBatch`].
pub struct Database {
    db: DBWithThreadMode<MultiThreaded>,
    path: PathBuf,
    write_options: WriteOptions,
}

impl Database {
    /// Open or create the database at `path` with all column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening claim trie database at: {}", path.display());

        if !path.exists() {
            std::fs::create_dir_all(path)
                .map_err(|e| Error::Storage(format!("failed to create database directory: {e}")))?;
        }

        // Block cache shared across all column families
        let cache = Cache::new_lru_cache(256 * 1024 * 1024);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_atomic_flush(true);
        db_opts.increase_parallelism(num_cpus::get() as i32);

        let cf_descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                let mut block_opts = BlockBasedOptions::default();
                block_opts.set_block_cache(&cache);
                block_opts.set_bloom_filter(10.0, false);
                cf_opts.set_block_based_table_factory(&block_opts);
                cf_opts.set_compression_type(DBCompressionType::Lz4);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect::<Vec<_>>();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &db_opts,
            path,
            cf_descriptors,
        )
        .map_err(|e| {
            error!("Failed to open database: {}", e);
            Error::Storage(format!("failed to open database: {e}"))
        })?;

        // fsync on every write; change logs must hit disk within modify
        let mut write_options = WriteOptions::default();
        write_options.set_sync(true);

        Ok(Self {
            db,
            path: path.to_path_buf(),
            write_options,
        })
    }

    /// Path this database was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a column family handle.
    ///
    /// # Panics
    /// Panics if the column family doesn't exist (should never happen,
    /// all families are created at open).
    fn cf_handle(&self, name: &str) -> std::sync::Arc<rocksdb::BoundColumnFamily<'_>> {
        self.db
            .cf_handle(name)
            .unwrap_or_else(|| panic!("column family '{name}' not found"))
    }

    /// Get a value from the specified column family.
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(cf_name);
        Ok(self.db.get_cf(&cf, key)?)
    }

    /// Put a key-value pair in the specified column family.
    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf_name);
        self.db
            .put_cf_opt(&cf, key, value, &self.write_options)
            .map_err(|e| {
                error!("Failed to put key in {}: {}", cf_name, e);
                Error::from(e)
            })
    }

    /// Create a write batch for atomic multi-key writes.
    pub fn batch(&self) -> WriteBatch {
        WriteBatch::default()
    }

    /// Add a put operation to a write batch.
    pub fn batch_put(&self, batch: &mut WriteBatch, cf_name: &str, key: &[u8], value: &[u8]) {
        let cf = self.cf_handle(cf_name);
        batch.put_cf(&cf, key, value);
    }

    /// Write a batch atomically.
    pub fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write_opt(batch, &self.write_options)
            .map_err(|e| {
                error!("Failed to write batch: {}", e);
                Error::from(e)
            })
    }

    /// Iterate over all keys of a column family, in key order.
    pub fn iter_keys(&self, cf_name: &str) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf_handle(cf_name);
        self.db
            .iterator_cf(&cf, IteratorMode::Start)
            .map(|entry| {
                entry
                    .map(|(key, _)| key.to_vec())
                    .map_err(Error::from)
            })
            .collect()
    }

    /// Flush all memtables to disk. Called on close.
    pub fn flush(&self) -> Result<()> {
        for cf_name in COLUMN_FAMILIES {
            let cf = self.cf_handle(cf_name);
            self.db.flush_cf(&cf).map_err(|e| {
                error!("Failed to flush column family {}: {}", cf_name, e);
                Error::from(e)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_round_trip() {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::open(dir.path()).expect("open");
        db.put(CF_CHANGES, b"name", b"payload").unwrap();
        assert_eq!(db.get(CF_CHANGES, b"name").unwrap().as_deref(), Some(&b"payload"[..]));
        assert_eq!(db.get(CF_CHANGES, b"missing").unwrap(), None);
    }

    #[test]
    fn test_column_families_are_disjoint() {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::open(dir.path()).expect("open");
        db.put(CF_CHANGES, b"k", b"a").unwrap();
        db.put(CF_META, b"k", b"b").unwrap();
        assert_eq!(db.get(CF_CHANGES, b"k").unwrap().unwrap(), b"a");
        assert_eq!(db.get(CF_META, b"k").unwrap().unwrap(), b"b");
    }

    #[test]
    fn test_batch_writes_are_atomic() {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::open(dir.path()).expect("open");
        let mut batch = db.batch();
        db.batch_put(&mut batch, CF_TRIE_NODES, b"h1", b"v1");
        db.batch_put(&mut batch, CF_TRIE_NODES, b"h2", b"v2");
        db.write_batch(batch).unwrap();
        assert!(db.get(CF_TRIE_NODES, b"h1").unwrap().is_some());
        assert!(db.get(CF_TRIE_NODES, b"h2").unwrap().is_some());
    }

    #[test]
    fn test_iter_keys_in_order() {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::open(dir.path()).expect("open");
        db.put(CF_CHANGES, b"b", b"2").unwrap();
        db.put(CF_CHANGES, b"a", b"1").unwrap();
        let keys = db.iter_keys(CF_CHANGES).unwrap();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
