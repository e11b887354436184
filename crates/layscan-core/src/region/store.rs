//! Cache store contract for recognized-text results.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::RegionError;

/// A key-value store for recognized text, keyed by region key.
///
/// Implementations must tolerate concurrent external access: readers
/// never observe a partial write, and concurrent writers to the same
/// key resolve last-write-wins. Once set, a value is treated as
/// immutable by this library.
pub trait CacheStore {
    /// Whether a value exists for `key`.
    fn exists(&self, key: &str) -> bool;

    /// Fetch the value for `key`.
    fn get(&self, key: &str) -> Result<String, RegionError>;

    /// Store `value` under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), RegionError>;
}

/// Filesystem store sharded by key prefix: `root/ab/cd/<key>.txt`.
///
/// Writes go to a process-unique temp file first and are renamed into
/// place, so a concurrent reader sees either the old value or the new
/// one, never a torn write.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, RegionError> {
        let (first, second) = shards(key)?;
        Ok(self.root.join(first).join(second).join(format!("{key}.txt")))
    }

    fn store_err(key: &str, err: impl std::fmt::Display) -> RegionError {
        RegionError::Store {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

impl CacheStore for FsStore {
    fn exists(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.exists()).unwrap_or(false)
    }

    fn get(&self, key: &str) -> Result<String, RegionError> {
        std::fs::read_to_string(self.path_for(key)?).map_err(|e| Self::store_err(key, e))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), RegionError> {
        let path = self.path_for(key)?;
        let dir = path.parent().expect("sharded path always has a parent");
        std::fs::create_dir_all(dir).map_err(|e| Self::store_err(key, e))?;

        let tmp = dir.join(format!("{key}.tmp.{}", std::process::id()));
        std::fs::write(&tmp, value).map_err(|e| Self::store_err(key, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| Self::store_err(key, e))?;
        Ok(())
    }
}

/// In-memory store, useful for tests and single-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn exists(&self, key: &str) -> bool {
        self.entries.lock().expect("store lock").contains_key(key)
    }

    fn get(&self, key: &str) -> Result<String, RegionError> {
        self.entries
            .lock()
            .expect("store lock")
            .get(key)
            .cloned()
            .ok_or_else(|| RegionError::Store {
                key: key.to_string(),
                reason: "missing key".to_string(),
            })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), RegionError> {
        self.entries
            .lock()
            .expect("store lock")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Two-level shard prefixes for a key.
///
/// Keys shorter than four ASCII characters cannot be sharded; hex
/// digests always can.
fn shards(key: &str) -> Result<(&str, &str), RegionError> {
    if key.len() < 4 || !key.is_char_boundary(2) || !key.is_char_boundary(4) {
        return Err(RegionError::Store {
            key: key.to_string(),
            reason: "key too short to shard".to_string(),
        });
    }
    Ok((&key[..2], &key[2..4]))
}

/// Sharded artifact path for a region key under `root`, mirroring
/// [`FsStore`] layout but with an arbitrary extension.
pub(crate) fn sharded_path(
    root: &Path,
    key: &str,
    extension: &str,
) -> Result<PathBuf, RegionError> {
    let (first, second) = shards(key)?;
    Ok(root
        .join(first)
        .join(second)
        .join(format!("{key}.{extension}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fs_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let key = "deadbeefcafe0123";

        assert!(!store.exists(key));
        store.set(key, "42").unwrap();
        assert!(store.exists(key));
        assert_eq!(store.get(key).unwrap(), "42");

        // Sharded layout: de/ad/<key>.txt
        assert!(dir.path().join("de").join("ad").join("deadbeefcafe0123.txt").exists());
    }

    #[test]
    fn fs_store_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        store.set("00112233", "first").unwrap();
        store.set("00112233", "second").unwrap();
        assert_eq!(store.get("00112233").unwrap(), "second");
    }

    #[test]
    fn fs_store_rejects_unshardable_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());

        for key in ["", "ab", "abc"] {
            assert!(!store.exists(key));
            assert!(matches!(store.get(key), Err(RegionError::Store { .. })));
            assert!(matches!(store.set(key, "v"), Err(RegionError::Store { .. })));
        }
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(!store.exists("k0k0"));
        store.set("k0k0", "value").unwrap();
        assert_eq!(store.get("k0k0").unwrap(), "value");
        assert!(store.get("absent").is_err());
    }
}
