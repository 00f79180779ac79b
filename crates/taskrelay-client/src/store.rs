//! File-based snapshot store: keyed JSON blobs with a save timestamp.
//! Used to mirror in-flight tasks (so a restarted CLI can resume polling)
//! and to cache the last result per flow. Last write wins, no locking.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use taskrelay_core::error::{Result, TaskRelayError};

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot<T> {
    saved_at: DateTime<Utc>,
    value: T,
}

/// Directory of `<key>.json` snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Create a store at the given directory.
    pub fn new(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).ok();
        Self {
            path: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.path
    }

    fn file_for(&self, key: &str) -> PathBuf {
        self.path.join(format!("{}.json", sanitize_key(key)))
    }

    /// Save `value` under `key`, replacing whatever was there.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.path)?;
        let snapshot = Snapshot {
            saved_at: Utc::now(),
            value,
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| TaskRelayError::Store(format!("Serialize error: {e}")))?;
        let file = self.file_for(key);
        std::fs::write(&file, json)?;
        tracing::debug!("💾 Saved snapshot '{key}' to {}", file.display());
        Ok(())
    }

    /// Read `key`. Missing, unreadable or older-than-`max_age` entries give
    /// `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, max_age: Option<Duration>) -> Option<T> {
        let file = self.file_for(key);
        if !file.exists() {
            return None;
        }
        let json = match std::fs::read_to_string(&file) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("⚠️ Failed to read snapshot '{key}': {e}");
                return None;
            }
        };
        let snapshot: Snapshot<T> = match serde_json::from_str(&json) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("⚠️ Failed to parse snapshot '{key}': {e}");
                return None;
            }
        };
        if let Some(max_age) = max_age {
            let age = (Utc::now() - snapshot.saved_at).to_std().unwrap_or_default();
            if age > max_age {
                tracing::debug!("Snapshot '{key}' expired ({}s old)", age.as_secs());
                return None;
            }
        }
        Some(snapshot.value)
    }

    /// Delete `key`. Returns whether anything was removed.
    pub fn remove(&self, key: &str) -> bool {
        std::fs::remove_file(self.file_for(key)).is_ok()
    }

    /// Stored keys (in their sanitized form), sorted.
    pub fn keys(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.path) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json").map(String::from)
            })
            .collect();
        keys.sort();
        keys
    }

    /// Remove every snapshot. Returns how many were deleted.
    pub fn clear(&self) -> usize {
        self.keys().iter().filter(|k| self.remove(k)).count()
    }
}

/// Keys like `task:title` become file-safe names like `task_title`.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskrelay_core::types::Task;

    fn store(name: &str) -> (SnapshotStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("taskrelay-test-store-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        (SnapshotStore::new(&dir), dir)
    }

    #[test]
    fn test_put_get_remove() {
        let (store, dir) = store("basic");
        let task = Task::new("abc123", "http://s/abc123");
        store.put("task:title", &task).unwrap();

        let loaded: Task = store.get("task:title", None).unwrap();
        assert_eq!(loaded, task);
        assert_eq!(store.keys(), vec!["task_title".to_string()]);

        assert!(store.remove("task:title"));
        assert!(!store.remove("task:title"));
        assert!(store.get::<Task>("task:title", None).is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_expired_entries_are_ignored() {
        let (store, dir) = store("expiry");
        let stale = serde_json::json!({
            "saved_at": (Utc::now() - chrono::Duration::hours(2)).to_rfc3339(),
            "value": "old"
        });
        std::fs::write(dir.join("result_title.json"), stale.to_string()).unwrap();

        assert!(store.get::<String>("result:title", Some(Duration::from_secs(3600))).is_none());
        assert_eq!(store.get::<String>("result:title", None).as_deref(), Some("old"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_snapshot_reads_as_none() {
        let (store, dir) = store("corrupt");
        std::fs::write(dir.join("broken.json"), "{not json").unwrap();
        assert!(store.get::<String>("broken", None).is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_clear() {
        let (store, dir) = store("clear");
        store.put("a", &1).unwrap();
        store.put("b", &2).unwrap();
        assert_eq!(store.clear(), 2);
        assert!(store.keys().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
