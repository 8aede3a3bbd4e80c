//! The `id -> relative_path` index: an append-mostly log on top of a
//! compact snapshot, so `get_point`/`delete_points` never need a directory
//! scan. Rebuildable from the record files themselves if lost or corrupted,
//! since every record file is self-describing.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{StoreError, StoreResult};

const SNAPSHOT_FILE: &str = "id_index.bin";
const LOG_FILE: &str = "id_index.log";
/// Compact once the log grows past this multiple of the snapshot's size.
const COMPACT_RATIO: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum LogOp {
    Upsert { id: String, path: String },
    Delete { id: String },
}

pub struct IdIndex {
    collection_root: PathBuf,
    map: RwLock<HashMap<String, String>>,
    log_entries_since_snapshot: std::sync::atomic::AtomicUsize,
}

impl IdIndex {
    /// Load the snapshot (if present) and replay the log on top of it. If
    /// both are missing or unreadable, the caller should fall back to
    /// [`IdIndex::rebuild_by_scan`].
    pub fn load(collection_root: &Path) -> StoreResult<Self> {
        let snapshot_path = collection_root.join(SNAPSHOT_FILE);
        let mut map = if snapshot_path.exists() {
            let bytes = std::fs::read(&snapshot_path)?;
            bincode::deserialize::<HashMap<String, String>>(&bytes)
                .map_err(|e| StoreError::IdIndexCorrupt(e.to_string()))
                .unwrap_or_default()
        } else {
            HashMap::new()
        };

        let log_path = collection_root.join(LOG_FILE);
        let mut replayed = 0usize;
        if log_path.exists() {
            let file = std::fs::File::open(&log_path)?;
            for line in BufReader::new(file).lines() {
                let Ok(line) = line else { continue };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogOp>(&line) {
                    Ok(LogOp::Upsert { id, path }) => {
                        map.insert(id, path);
                        replayed += 1;
                    }
                    Ok(LogOp::Delete { id }) => {
                        map.remove(&id);
                        replayed += 1;
                    }
                    Err(err) => {
                        warn!(?err, "skipping corrupt id_index log line");
                    }
                }
            }
        }

        Ok(Self {
            collection_root: collection_root.to_owned(),
            map: RwLock::new(map),
            log_entries_since_snapshot: std::sync::atomic::AtomicUsize::new(replayed),
        })
    }

    /// Rebuild the index by scanning every `vector_*.json` record file
    /// under the collection root and reading its self-described `id`.
    pub fn rebuild_by_scan(collection_root: &Path) -> StoreResult<Self> {
        let mut map = HashMap::new();
        for entry in walk_record_files(collection_root) {
            let Ok(bytes) = std::fs::read(&entry) else {
                continue;
            };
            #[derive(Deserialize)]
            struct IdOnly {
                id: String,
            }
            match serde_json::from_slice::<IdOnly>(&bytes) {
                Ok(parsed) => {
                    let relative = entry
                        .strip_prefix(collection_root)
                        .unwrap_or(&entry)
                        .to_string_lossy()
                        .into_owned();
                    map.insert(parsed.id, relative);
                }
                Err(err) => {
                    warn!(?err, path = %entry.display(), "corrupt record skipped during id index rebuild");
                }
            }
        }
        debug!(count = map.len(), "rebuilt id index by scan");
        let index = Self {
            collection_root: collection_root.to_owned(),
            map: RwLock::new(map),
            log_entries_since_snapshot: std::sync::atomic::AtomicUsize::new(0),
        };
        index.compact()?;
        Ok(index)
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.map.read().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.map.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn upsert(&self, id: &str, relative_path: &str) -> StoreResult<()> {
        self.append_log(&LogOp::Upsert {
            id: id.to_owned(),
            path: relative_path.to_owned(),
        })?;
        self.map
            .write()
            .unwrap()
            .insert(id.to_owned(), relative_path.to_owned());
        self.maybe_compact()?;
        Ok(())
    }

    pub fn remove(&self, id: &str) -> StoreResult<()> {
        self.append_log(&LogOp::Delete { id: id.to_owned() })?;
        self.map.write().unwrap().remove(id);
        self.maybe_compact()?;
        Ok(())
    }

    fn append_log(&self, op: &LogOp) -> StoreResult<()> {
        let log_path = self.collection_root.join(LOG_FILE);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let line = serde_json::to_string(op)?;
        writeln!(file, "{line}")?;
        self.log_entries_since_snapshot
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    fn maybe_compact(&self) -> StoreResult<()> {
        let entries = self
            .log_entries_since_snapshot
            .load(std::sync::atomic::Ordering::Relaxed);
        let snapshot_len = self.len().max(1);
        if entries > snapshot_len * COMPACT_RATIO {
            self.compact()?;
        }
        Ok(())
    }

    /// Fold the log back into the snapshot. Called opportunistically once
    /// the log grows past a multiple of the snapshot's record count.
    pub fn compact(&self) -> StoreResult<()> {
        let snapshot_path = self.collection_root.join(SNAPSHOT_FILE);
        let tmp_path = self.collection_root.join("id_index.bin.tmp");
        let bytes = {
            let map = self.map.read().unwrap();
            bincode::serialize(&*map).map_err(|e| StoreError::IdIndexCorrupt(e.to_string()))?
        };
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &snapshot_path)?;

        let log_path = self.collection_root.join(LOG_FILE);
        std::fs::write(&log_path, b"")?;
        self.log_entries_since_snapshot
            .store(0, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}

fn walk_record_files(collection_root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let walker = walkdir_shallow(collection_root, 5);
    for path in walker {
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("vector_") && n.ends_with(".json"))
        {
            out.push(path);
        }
    }
    out
}

/// A tiny manual recursive walk (the quantized layout is a fixed 4 levels
/// deep, so we don't need a general-purpose directory walker here).
fn walkdir_shallow(root: &Path, max_depth: usize) -> Vec<PathBuf> {
    fn visit(dir: &Path, depth: usize, max_depth: usize, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && depth < max_depth {
                visit(&path, depth + 1, max_depth, out);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }
    let mut out = Vec::new();
    visit(root, 0, max_depth, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let index = IdIndex::load(dir.path()).unwrap();
        index.upsert("a", "00/11/22/33/vector_abc.json").unwrap();
        assert_eq!(
            index.get("a").as_deref(),
            Some("00/11/22/33/vector_abc.json")
        );
    }

    #[test]
    fn remove_clears_entry() {
        let dir = tempfile::tempdir().unwrap();
        let index = IdIndex::load(dir.path()).unwrap();
        index.upsert("a", "p").unwrap();
        index.remove("a").unwrap();
        assert_eq!(index.get("a"), None);
    }

    #[test]
    fn reload_replays_log_on_top_of_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = IdIndex::load(dir.path()).unwrap();
            index.upsert("a", "p1").unwrap();
            index.upsert("b", "p2").unwrap();
        }
        let reloaded = IdIndex::load(dir.path()).unwrap();
        assert_eq!(reloaded.get("a").as_deref(), Some("p1"));
        assert_eq!(reloaded.get("b").as_deref(), Some("p2"));
    }

    #[test]
    fn compaction_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let index = IdIndex::load(dir.path()).unwrap();
        for i in 0..20 {
            index.upsert(&format!("id{i}"), "p").unwrap();
        }
        index.compact().unwrap();
        assert_eq!(index.len(), 20);
        let reloaded = IdIndex::load(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 20);
    }
}
