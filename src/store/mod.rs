//! C2: the on-disk vector store. Upsert, get, scroll, delete, filter, and
//! exhaustive scan over `(id, vector, payload)` records, addressed by a
//! quantized directory path derived from the vector and a content-addressed
//! filename derived from the id.

pub mod collection;
pub mod error;
pub mod git_policy;
pub mod id_index;

use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::payload::Filter;
use crate::quantizer::{quantized_path, record_filename};
use crate::record::Record;

pub use collection::{CollectionHandle, CollectionMeta};
pub use error::{StoreError, StoreResult};
use git_policy::FileGitState;

/// Invoked for every record written in a batch: `(current, total, path, info)`.
pub type ProgressCallback<'a> = dyn Fn(usize, usize, &str, &str) + Send + Sync + 'a;

#[derive(Debug, Clone)]
pub struct UpsertReport {
    pub count: usize,
    pub failed: Vec<(String, String)>,
}

impl UpsertReport {
    pub fn status(&self) -> &'static str {
        if self.failed.is_empty() {
            "ok"
        } else {
            "partial_failure"
        }
    }
}

pub struct VectorStore {
    root: PathBuf,
    collections: scc::HashMap<String, Arc<CollectionHandle>>,
}

impl VectorStore {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        std::fs::create_dir_all(&root).ok();
        Self {
            root,
            collections: scc::HashMap::new(),
        }
    }

    fn collection_root(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Idempotent: if the directory and matrix already exist, succeeds
    /// without regenerating the matrix.
    pub fn create_collection(&self, name: &str, vector_size: usize) -> StoreResult<bool> {
        let created_fresh = !self.collection_root(name).join(collection::COLLECTION_META_FILE).exists();
        let handle = CollectionHandle::create(self.collection_root(name), name, vector_size)?;
        let _ = self.collections.insert(name.to_owned(), Arc::new(handle));
        info!(collection = name, vector_size, "collection ready");
        Ok(created_fresh)
    }

    pub fn collection_exists(&self, name: &str) -> bool {
        self.collection_root(name)
            .join(collection::COLLECTION_META_FILE)
            .exists()
    }

    pub fn list_collections(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if entry.path().join(collection::COLLECTION_META_FILE).exists() {
                    if let Some(name) = entry.file_name().to_str() {
                        names.push(name.to_owned());
                    }
                }
            }
        }
        names.sort();
        names
    }

    pub fn get_collection_info(&self, name: &str) -> StoreResult<CollectionMeta> {
        Ok(self.handle(name)?.meta.clone())
    }

    fn handle(&self, name: &str) -> StoreResult<Arc<CollectionHandle>> {
        if let Some(entry) = self.collections.get(name) {
            return Ok(entry.get().clone());
        }
        if !self.collection_exists(name) {
            return Err(StoreError::CollectionNotFound(name.to_owned()));
        }
        let handle = Arc::new(CollectionHandle::open(self.collection_root(name))?);
        let _ = self.collections.insert(name.to_owned(), handle.clone());
        Ok(handle)
    }

    pub fn begin_indexing(&self, collection: &str) -> StoreResult<()> {
        self.handle(collection)?.begin_indexing();
        Ok(())
    }

    /// Clears the indexing bracket and reports whether the caller should
    /// trigger an HNSW rebuild (`!skip_hnsw_rebuild`) or merely mark the
    /// index stale (`skip_hnsw_rebuild == true`, watcher mode).
    pub fn end_indexing(&self, collection: &str, skip_hnsw_rebuild: bool) -> StoreResult<bool> {
        let handle = self.handle(collection)?;
        handle.end_indexing();
        Ok(!skip_hnsw_rebuild)
    }

    /// Write a batch of records. Applies the batch in input order (last
    /// write for a given id wins), computing each record's quantized path
    /// and the file's git-aware content policy in one batched pass.
    pub fn upsert_points(
        &self,
        collection: &str,
        repo_root: Option<&std::path::Path>,
        mut records: Vec<Record>,
        progress: Option<&ProgressCallback<'_>>,
    ) -> StoreResult<UpsertReport> {
        let handle = self.handle(collection)?;
        let total = records.len();

        if let Some(repo_root) = repo_root {
            apply_git_policy(repo_root, &mut records);
        }

        let mut failed = Vec::new();
        for (i, record) in records.into_iter().enumerate() {
            if record.vector.len() != handle.meta.vector_size {
                failed.push((
                    record.id.clone(),
                    StoreError::DimensionMismatch {
                        collection: collection.to_owned(),
                        expected: handle.meta.vector_size,
                        actual: record.vector.len(),
                    }
                    .to_string(),
                ));
                continue;
            }

            let new_segments = quantized_path(&handle.matrix, &record.vector);
            let relative_path = std::path::PathBuf::from(new_segments.join("/"))
                .join(record_filename(&record.id))
                .to_string_lossy()
                .into_owned();

            // If a prior record with this id lived at a *different*
            // quantized path (the vector changed), remove the stale file.
            if let Some(old_relative) = handle.id_index.get(&record.id) {
                if old_relative != relative_path {
                    let _ = std::fs::remove_file(handle.root.join(&old_relative));
                }
            }

            let full_path = handle.root.join(&relative_path);
            let bytes = match serde_json::to_vec(&record) {
                Ok(b) => b,
                Err(err) => {
                    failed.push((record.id.clone(), err.to_string()));
                    continue;
                }
            };

            match collection::write_atomic(&full_path, &bytes) {
                Ok(()) => {
                    handle.id_index.upsert(&record.id, &relative_path)?;
                    if let Some(temporal) = &handle.temporal {
                        temporal.lock().unwrap().save_metadata(
                            &record.id,
                            record.payload.commit_hash(),
                            record.payload.path(),
                            record.payload.chunk_index(),
                        )?;
                    }
                }
                Err(err) => {
                    warn!(id = %record.id, ?err, "failed to write record");
                    failed.push((record.id.clone(), err.to_string()));
                }
            }

            if let Some(cb) = progress {
                cb(i + 1, total, relative_path.as_str(), &record.id);
            }
        }

        debug!(collection, written = total - failed.len(), failed = failed.len(), "upsert batch complete");
        Ok(UpsertReport {
            count: total - failed.len(),
            failed,
        })
    }

    /// O(1) lookup via the id index. On miss, returns `None` without
    /// scanning the collection.
    pub fn get_point(&self, collection: &str, id: &str) -> StoreResult<Option<Record>> {
        let handle = self.handle(collection)?;
        let Some(relative_path) = handle.id_index.get(id) else {
            return Ok(None);
        };
        match std::fs::read(handle.root.join(&relative_path)) {
            Ok(bytes) => match serde_json::from_slice::<Record>(&bytes) {
                Ok(record) => Ok(Some(record)),
                Err(err) => {
                    warn!(id, ?err, "corrupt record skipped on get");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    pub fn count_points(&self, collection: &str) -> StoreResult<usize> {
        Ok(self.handle(collection)?.id_index.len())
    }

    /// Stable ordering by id. `offset` is the number of records already
    /// returned to the caller; the returned `next_offset` is `None` once
    /// exhausted.
    pub fn scroll_points(
        &self,
        collection: &str,
        limit: usize,
        offset: usize,
        with_payload: bool,
        with_vectors: bool,
    ) -> StoreResult<(Vec<Record>, Option<usize>)> {
        let handle = self.handle(collection)?;
        let ids = handle.id_index.all_ids();
        let page: Vec<&String> = ids.iter().skip(offset).take(limit).collect();
        let mut records = Vec::with_capacity(page.len());
        for id in page {
            if let Some(mut record) = self.get_point(collection, id)? {
                if !with_payload {
                    record.payload = crate::payload::Payload::new();
                }
                if !with_vectors {
                    record.vector.clear();
                }
                records.push(record);
            }
        }
        let next_offset = if offset + limit < ids.len() {
            Some(offset + limit)
        } else {
            None
        };
        Ok((records, next_offset))
    }

    pub fn delete_points(&self, collection: &str, ids: &[String]) -> StoreResult<usize> {
        let handle = self.handle(collection)?;
        let mut deleted = 0;
        for id in ids {
            if let Some(relative_path) = handle.id_index.get(id) {
                let _ = std::fs::remove_file(handle.root.join(&relative_path));
                handle.id_index.remove(id)?;
                if let Some(temporal) = &handle.temporal {
                    let hash_prefix = crate::temporal::TemporalDb::hash_prefix(id);
                    temporal.lock().unwrap().delete_metadata(&hash_prefix)?;
                }
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn delete_by_filter(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        let handle = self.handle(collection)?;
        let ids = handle.id_index.all_ids();
        let mut to_delete = Vec::new();
        for id in &ids {
            if let Some(record) = self.get_point(collection, id)? {
                if filter.matches(&record.payload) {
                    to_delete.push(id.clone());
                }
            }
        }
        self.delete_points(collection, &to_delete)
    }

    /// Exhaustive cosine-similarity scan over every record in the
    /// collection. Used directly when no HNSW index is available, and as
    /// the ground truth the staleness-coordination property test checks
    /// HNSW results against.
    pub fn exhaustive_search(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> StoreResult<Vec<(Record, f32)>> {
        let handle = self.handle(collection)?;
        let ids = handle.id_index.all_ids();
        let mut scored: Vec<(Record, f32)> = ids
            .par_iter()
            .filter_map(|id| self.get_point(collection, id).ok().flatten())
            .filter(|record| filter.map(|f| f.matches(&record.payload)).unwrap_or(true))
            .map(|record| {
                let score = cosine_similarity(query_vec, &record.vector);
                (record, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn apply_git_policy(repo_root: &std::path::Path, records: &mut [Record]) {
    let paths: Vec<String> = records
        .iter()
        .filter_map(|r| r.payload.path().map(|p| p.to_owned()))
        .collect();
    if paths.is_empty() {
        return;
    }
    let classification = git_policy::classify_batch(repo_root, &paths);

    for record in records.iter_mut() {
        let Some(path) = record.payload.path().map(|p| p.to_owned()) else {
            continue;
        };
        match classification.get(&path) {
            Some(FileGitState::Clean { blob_hash }) => {
                record.payload.0.remove("chunk_text");
                record.payload.insert("git_blob_hash", blob_hash.clone());
                record
                    .payload
                    .insert("indexed_with_uncommitted_changes", false);
            }
            Some(FileGitState::Dirty) => {
                record
                    .payload
                    .insert("indexed_with_uncommitted_changes", true);
                // chunk_text is expected to already be populated by the
                // caller (the chunker reads from the working tree).
            }
            Some(FileGitState::NonGit) | None => {
                // leave chunk_text as supplied; no git fields recorded.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;

    fn store_with_collection(vector_size: usize) -> (tempfile::TempDir, VectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path());
        store.create_collection("c", vector_size).unwrap();
        (dir, store)
    }

    fn record(id: &str, vector: Vec<f32>, path: &str) -> Record {
        let mut payload = Payload::new();
        payload.insert("path", path);
        payload.insert("line_start", 1i64);
        payload.insert("line_end", 2i64);
        payload.insert("language", "python");
        payload.insert("type", "content");
        payload.insert("chunk_text", "def a(): pass");
        Record::new(id, vector, payload)
    }

    #[test]
    fn upsert_then_get_roundtrips_bit_equal() {
        let (_dir, store) = store_with_collection(4);
        let r = record("a", vec![1.0, 0.0, 0.0, 0.0], "x.py");
        store
            .upsert_points("c", None, vec![r.clone()], None)
            .unwrap();
        let fetched = store.get_point("c", "a").unwrap().unwrap();
        assert_eq!(fetched.vector, r.vector);
        assert_eq!(fetched.payload, r.payload);
    }

    #[test]
    fn a_dimension_mismatch_mid_batch_does_not_drop_later_records() {
        let (_dir, store) = store_with_collection(4);
        let good_before = record("a", vec![1.0, 0.0, 0.0, 0.0], "a.py");
        let bad = record("b", vec![1.0, 0.0], "b.py");
        let good_after = record("c", vec![0.0, 1.0, 0.0, 0.0], "c.py");

        let report = store
            .upsert_points("c", None, vec![good_before, bad, good_after], None)
            .unwrap();

        assert_eq!(report.count, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");
        assert!(store.get_point("c", "a").unwrap().is_some());
        assert!(store.get_point("c", "c").unwrap().is_some());
        assert!(store.get_point("c", "b").unwrap().is_none());
    }

    #[test]
    fn idempotent_reupsert_leaves_one_file() {
        let (_dir, store) = store_with_collection(4);
        let r = record("a", vec![1.0, 0.0, 0.0, 0.0], "x.py");
        store
            .upsert_points("c", None, vec![r.clone()], None)
            .unwrap();
        store.upsert_points("c", None, vec![r], None).unwrap();
        assert_eq!(store.count_points("c").unwrap(), 1);
    }

    #[test]
    fn cross_quantization_cleanup_removes_old_file() {
        let (_dir, store) = store_with_collection(4);
        let r1 = record("a", vec![1.0, 0.0, 0.0, 0.0], "x.py");
        store.upsert_points("c", None, vec![r1], None).unwrap();
        let old_relative = {
            let handle = store.handle("c").unwrap();
            handle.id_index.get("a").unwrap()
        };
        let r2 = record("a", vec![-1.0, 0.0, 0.0, 0.0], "x.py");
        store.upsert_points("c", None, vec![r2], None).unwrap();
        let handle = store.handle("c").unwrap();
        assert!(!handle.root.join(&old_relative).exists() || handle.id_index.get("a").unwrap() == old_relative);
        assert_eq!(store.count_points("c").unwrap(), 1);
    }

    #[test]
    fn deleted_points_are_not_returned() {
        let (_dir, store) = store_with_collection(4);
        let r = record("a", vec![1.0, 0.0, 0.0, 0.0], "x.py");
        store.upsert_points("c", None, vec![r], None).unwrap();
        store.delete_points("c", &["a".to_string()]).unwrap();
        assert!(store.get_point("c", "a").unwrap().is_none());
        assert_eq!(store.count_points("c").unwrap(), 0);
    }

    #[test]
    fn exhaustive_search_orders_by_cosine_similarity() {
        let (_dir, store) = store_with_collection(4);
        let a = record("a", vec![1.0, 0.0, 0.0, 0.0], "x.py");
        let b = record("b", vec![0.0, 1.0, 0.0, 0.0], "y.py");
        store.upsert_points("c", None, vec![a, b], None).unwrap();
        let results = store
            .exhaustive_search("c", &[1.0, 0.0, 0.0, 0.0], 2, None)
            .unwrap();
        assert_eq!(results[0].0.id, "a");
        assert!((results[0].1 - 1.0).abs() < 1e-5);
        assert!(results[1].1.abs() < 1e-5);
    }

    #[test]
    fn concurrent_writers_produce_exactly_n_readable_records() {
        use std::sync::Arc;
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(VectorStore::open(dir.path()));
        store.create_collection("c", 4).unwrap();

        let mut handles = Vec::new();
        for t in 0..10 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..10 {
                    let id = format!("t{t}-{i}");
                    let r = record(&id, vec![t as f32, i as f32, 0.0, 0.0], "x.py");
                    store.upsert_points("c", None, vec![r], None).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.count_points("c").unwrap(), 100);
        let (records, _) = store.scroll_points("c", 100, 0, true, true).unwrap();
        assert_eq!(records.len(), 100);
    }

    #[test]
    fn temporal_collection_upsert_populates_metadata_db_and_deletion_cleans_it_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path());
        store
            .create_collection(crate::temporal::TEMPORAL_COLLECTION_NAME, 4)
            .unwrap();

        let long_id = format!("proj/diff/{}/src/main.rs/0", "a".repeat(280));
        let mut payload = Payload::new();
        payload.insert("path", "src/main.rs");
        payload.insert("commit_hash", "deadbeef");
        payload.insert("chunk_index", 0i64);
        payload.insert("chunk_text", "fn main() {}");
        let record = Record::new(&long_id, vec![1.0, 0.0, 0.0, 0.0], payload);

        store
            .upsert_points(
                crate::temporal::TEMPORAL_COLLECTION_NAME,
                None,
                vec![record],
                None,
            )
            .unwrap();

        let fetched = store
            .get_point(crate::temporal::TEMPORAL_COLLECTION_NAME, &long_id)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.payload.commit_hash(), Some("deadbeef"));

        store
            .delete_points(crate::temporal::TEMPORAL_COLLECTION_NAME, &[long_id.clone()])
            .unwrap();
        assert!(store
            .get_point(crate::temporal::TEMPORAL_COLLECTION_NAME, &long_id)
            .unwrap()
            .is_none());
    }
}
