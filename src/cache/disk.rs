//! L2: `DiskStore` — optional write-through JSON serialization per key
//! (§4.1 disk tier, §6 persisted state layout).
//!
//! Disk writes happen without the memory store's lock held (§5); races
//! between concurrent writers to the same key are accepted as
//! last-writer-wins.

use super::entry::{CacheEntry, Tier};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    value: serde_json::Value,
    created_at: u64,
    ttl: u64,
    access_count: u64,
    category: String,
    priority: u8,
}

pub struct DiskStore {
    cache_dir: PathBuf,
}

impl DiskStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// `{cache_dir}/{md5(key)}.json`, exactly as specified (§6).
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Md5::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        self.cache_dir.join(format!("{:x}.json", digest))
    }

    /// Write-through after memory admission. A failure here is demoted to
    /// a logged warning (`DiskIOError`, §7) — it is never a failed `set`.
    pub fn write(&self, entry: &CacheEntry) {
        let record = DiskRecord {
            key: entry.key.clone(),
            value: entry.value.clone(),
            created_at: entry.created_at,
            ttl: entry.ttl_seconds,
            access_count: entry.access_count,
            category: entry.category.clone(),
            priority: entry.priority,
        };
        let path = self.path_for(&entry.key);
        match serde_json::to_vec_pretty(&record) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    warn!(key = %entry.key, error = %e, "disk cache write failed, continuing with memory only");
                }
            },
            Err(e) => {
                warn!(key = %entry.key, error = %e, "disk cache serialization failed");
            },
        }
    }

    /// Read-through on a memory miss. Corrupt files are logged and left in
    /// place for audit — never auto-deleted, never synthesized (§4.1, §9).
    pub fn read(&self, key: &str, now: u64, default_tier: Tier) -> Option<CacheEntry> {
        let entry = self.read_raw(key, default_tier)?;
        if entry.is_expired(now) {
            None
        } else {
            Some(entry)
        }
    }

    /// Loads whatever is on disk for `key` without filtering on expiry,
    /// for callers comparing the disk copy against memory rather than
    /// serving it (the consistency-check sample, §4.1 supplement).
    pub fn read_raw(&self, key: &str, default_tier: Tier) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice::<DiskRecord>(&bytes) {
            Ok(record) => {
                let mut entry = CacheEntry::new(
                    record.key,
                    record.value,
                    record.ttl,
                    record.category,
                    record.priority,
                    default_tier,
                );
                entry.created_at = record.created_at;
                entry.access_count = record.access_count;
                Some(entry)
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "disk cache file corrupt, leaving in place");
                None
            },
        }
    }

    pub fn delete(&self, key: &str) {
        let path = self.path_for(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "failed to remove disk cache file");
            }
        }
    }

    /// Category-scoped clear requires reading each file's category field
    /// since the filename only encodes the key hash.
    pub fn clear(&self, category: Option<&str>) -> usize {
        let mut count = 0;
        let Ok(read_dir) = std::fs::read_dir(&self.cache_dir) else {
            return 0;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let matches = match category {
                None => true,
                Some(cat) => std::fs::read(&path)
                    .ok()
                    .and_then(|bytes| serde_json::from_slice::<DiskRecord>(&bytes).ok())
                    .map(|record| record.category == cat)
                    .unwrap_or(false),
            };
            if matches && std::fs::remove_file(&path).is_ok() {
                count += 1;
            }
        }
        count
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path()).unwrap();
        let entry = CacheEntry::new("k1", json!({"v": 1}), 300, "responses", 3, Tier::Warm);
        store.write(&entry);
        let loaded = store.read("k1", entry.created_at, Tier::Warm).unwrap();
        assert_eq!(loaded.value, json!({"v": 1}));
    }

    #[test]
    fn corrupt_file_is_ignored_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path()).unwrap();
        let path = store.path_for("broken");
        std::fs::write(&path, b"not json").unwrap();
        assert!(store.read("broken", 0, Tier::Warm).is_none());
        assert!(path.exists());
    }
}
