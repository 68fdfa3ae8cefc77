//! RocksDB storage layer

use crate::config::{CompressionType, StorageConfig};
use crate::errors::StorageError;
use rocksdb::{DBCompressionType, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct OptimizedStorage {
    db: Arc<DB>,
}

impl OptimizedStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open(path, 64, CompressionType::Lz4)
    }

    pub fn new_with_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::open(
            &config.data_directory,
            config.write_buffer_size_mb,
            config.compression_type,
        )
    }

    fn open<P: AsRef<Path>>(
        path: P,
        write_buffer_size_mb: usize,
        compression: CompressionType,
    ) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(write_buffer_size_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(match compression {
            CompressionType::None => DBCompressionType::None,
            CompressionType::Snappy => DBCompressionType::Snappy,
            CompressionType::Lz4 => DBCompressionType::Lz4,
            CompressionType::Zstd => DBCompressionType::Zstd,
        });

        let db = DB::open(&opts, path.as_ref())
            .map_err(|e| StorageError::DatabaseOpenFailed(format!("{}: {}", path.as_ref().display(), e)))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        Ok(self.db.put(key, value)?)
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        Ok(self.db.delete(key)?)
    }

    /// Apply all puts and deletes atomically
    pub fn batch_write<K, V>(&self, puts: &[(K, V)], deletes: &[Vec<u8>]) -> Result<(), StorageError>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::default();
        for key in deletes {
            batch.delete(key);
        }
        for (key, value) in puts {
            batch.put(key, value);
        }
        Ok(self.db.write(batch)?)
    }

    /// All key/value pairs whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StorageError> {
        Ok(self.scan_prefix(prefix)?.into_iter().map(|(k, _)| k).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_prefix_stops_at_boundary() {
        let dir = TempDir::new().unwrap();
        let storage = OptimizedStorage::new(dir.path()).unwrap();
        storage
            .batch_write(
                &[
                    (b"a:1".to_vec(), b"x".to_vec()),
                    (b"b:1".to_vec(), b"y".to_vec()),
                    (b"b:2".to_vec(), b"z".to_vec()),
                    (b"c:1".to_vec(), b"w".to_vec()),
                ],
                &[],
            )
            .unwrap();

        let rows = storage.scan_prefix(b"b:").unwrap();
        assert_eq!(
            rows,
            vec![
                (b"b:1".to_vec(), b"y".to_vec()),
                (b"b:2".to_vec(), b"z".to_vec())
            ]
        );
        assert!(storage.scan_prefix(b"d:").unwrap().is_empty());
    }

    #[test]
    fn test_batch_write_deletes_and_puts() {
        let dir = TempDir::new().unwrap();
        let storage = OptimizedStorage::new(dir.path()).unwrap();
        storage.put(b"k1", b"v1").unwrap();
        storage.put(b"k2", b"v2").unwrap();

        storage
            .batch_write(&[(b"k3".to_vec(), b"v3".to_vec())], &[b"k1".to_vec()])
            .unwrap();
        assert_eq!(storage.get(b"k1").unwrap(), None);
        assert_eq!(storage.get(b"k2").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(storage.get(b"k3").unwrap(), Some(b"v3".to_vec()));

        storage.delete(b"k2").unwrap();
        assert_eq!(storage.get(b"k2").unwrap(), None);
    }

    #[test]
    fn test_open_with_config() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            data_directory: dir.path().join("db").to_string_lossy().into_owned(),
            write_buffer_size_mb: 8,
            compression_type: CompressionType::None,
        };
        let storage = OptimizedStorage::new_with_config(&config).unwrap();
        storage.put(b"key", b"value").unwrap();
        assert_eq!(storage.get(b"key").unwrap(), Some(b"value".to_vec()));
    }
}
