//! C4: the approximate-nearest-neighbor index layered on top of the store.
//! The teacher delegates this entirely to an external qdrant server; here
//! it's `hnsw_rs`, embedded and owned directly by the process, persisted
//! to a small set of files per collection.

mod error;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use hnsw_rs::api::AnnT;
use hnsw_rs::hnsw::Hnsw;
use hnsw_rs::hnswio::HnswIo;
use hnsw_rs::prelude::DistCosine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::VectorStore;

pub use error::{HnswError, HnswResult};

const GRAPH_BASENAME: &str = "hnsw_graph";
const ID_MAPPING_FILE: &str = "id_mapping.json";
const STALE_MARKER_FILE: &str = "hnsw.stale";
const BUILD_REPORT_FILE: &str = "hnsw_build_report.json";

const MAX_NB_CONNECTION: usize = 24;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub vector_count: usize,
    pub built_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
}

/// Bijection between record ids and the graph's internal indices,
/// persisted alongside the graph itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IdMapping {
    id_to_internal: HashMap<String, usize>,
    internal_to_id: HashMap<usize, String>,
}

impl IdMapping {
    fn insert(&mut self, id: String, internal: usize) {
        self.internal_to_id.insert(internal, id.clone());
        self.id_to_internal.insert(id, internal);
    }
}

/// A loaded, queryable graph. Multiple readers may hold one concurrently;
/// it is immutable once constructed, matching `hnsw_rs`'s own read model.
/// Always produced by [`HnswIo::load_hnsw`], which owns its vector data, so
/// the `'static` lifetime parameter holds even though `Hnsw<'b, ..>` in
/// general supports borrowed data with a shorter `'b`.
pub struct IndexHandle {
    graph: Hnsw<'static, f32, DistCosine>,
    mapping: IdMapping,
    pub vector_count_at_last_build: usize,
}

impl IndexHandle {
    /// Top-k search returning `(record_id, cosine_distance)`, deterministic
    /// given the handle (the handle is never mutated after construction).
    pub fn search(&self, query_vec: &[f32], k: usize) -> Vec<(String, f32)> {
        self.graph
            .search(query_vec, k, EF_SEARCH)
            .into_iter()
            .filter_map(|neighbour| {
                self.mapping
                    .internal_to_id
                    .get(&neighbour.d_id)
                    .map(|id| (id.clone(), neighbour.distance))
            })
            .collect()
    }
}

/// Per-collection manager: builds, loads, and coordinates staleness for
/// one collection's graph. Held by the daemon cache entry, or constructed
/// ad hoc by a one-shot CLI search.
pub struct HnswIndexManager {
    collection_root: PathBuf,
    /// Serializes rebuilds so two writers never duplicate the work; readers
    /// are never blocked by this lock.
    builder_lock: Mutex<()>,
    handle: RwLock<Option<std::sync::Arc<IndexHandle>>>,
}

impl HnswIndexManager {
    pub fn new(collection_root: impl Into<PathBuf>) -> Self {
        Self {
            collection_root: collection_root.into(),
            builder_lock: Mutex::new(()),
            handle: RwLock::new(None),
        }
    }

    fn stale_marker_path(&self) -> PathBuf {
        self.collection_root.join(STALE_MARKER_FILE)
    }

    pub fn is_stale(&self) -> bool {
        self.stale_marker_path().exists() || !self.graph_files_exist()
    }

    fn graph_files_exist(&self) -> bool {
        self.collection_root
            .join(format!("{GRAPH_BASENAME}.hnsw.graph"))
            .exists()
    }

    /// Creates the stale marker atomically (sibling temp file + rename).
    pub fn mark_stale(&self) -> HnswResult<()> {
        let marker = self.stale_marker_path();
        let tmp = marker.with_extension("stale.tmp");
        std::fs::write(&tmp, b"")?;
        std::fs::rename(&tmp, &marker)?;
        *self.handle.write().unwrap() = None;
        Ok(())
    }

    fn clear_stale(&self) -> HnswResult<()> {
        let marker = self.stale_marker_path();
        if marker.exists() {
            std::fs::remove_file(&marker)?;
        }
        Ok(())
    }

    /// Exhaustively scans every record via the store and inserts all
    /// vectors into a fresh graph. Persists graph + mapping, clears stale.
    pub fn build(&self, store: &VectorStore, collection: &str) -> HnswResult<BuildReport> {
        let _guard = self.builder_lock.lock().unwrap();
        let started = std::time::Instant::now();

        let (records, _) = store.scroll_points(collection, usize::MAX, 0, true, true)?;

        let nb_elements = records.len().max(1);
        let mut mapping = IdMapping::default();
        {
            let mut graph = Hnsw::<f32, DistCosine>::new(
                MAX_NB_CONNECTION,
                nb_elements,
                MAX_LAYER,
                EF_CONSTRUCTION,
                DistCosine {},
            );
            for (internal_idx, record) in records.iter().enumerate() {
                graph.insert((&record.vector, internal_idx));
                mapping.insert(record.id.clone(), internal_idx);
            }
            std::fs::create_dir_all(&self.collection_root)?;
            graph
                .file_dump(&self.collection_root, GRAPH_BASENAME)
                .map_err(|e| HnswError::Graph(e.to_string()))?;
            // `graph` borrows `records`' vectors; drop it before touching
            // `records` again or returning, rather than carrying the borrow
            // forward as the served handle.
        }
        write_json_atomic(&self.collection_root.join(ID_MAPPING_FILE), &mapping)?;

        let report = BuildReport {
            vector_count: records.len(),
            built_at: chrono::Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        write_json_atomic(&self.collection_root.join(BUILD_REPORT_FILE), &report)?;
        self.clear_stale()?;
        *self.handle.write().unwrap() = None;
        info!(collection, count = report.vector_count, ms = report.duration_ms, "rebuilt HNSW graph");
        Ok(report)
    }

    /// Loads the persisted graph without rebuilding. Returns `None` if no
    /// graph has ever been built for this collection.
    pub fn load(&self) -> HnswResult<Option<std::sync::Arc<IndexHandle>>> {
        if let Some(handle) = self.handle.read().unwrap().clone() {
            return Ok(Some(handle));
        }
        if !self.graph_files_exist() {
            return Ok(None);
        }
        let mapping_path = self.collection_root.join(ID_MAPPING_FILE);
        let mapping: IdMapping = if mapping_path.exists() {
            serde_json::from_slice(&std::fs::read(&mapping_path)?)?
        } else {
            return Ok(None);
        };

        // `load_hnsw` ties the returned `Hnsw`'s lifetime to the `&mut
        // HnswIo` borrow even though the loaded graph owns its data (see
        // the `IndexHandle::graph` doc comment), so the `HnswIo` itself
        // must live for `'static` to satisfy the signature.
        let reload: &'static mut HnswIo =
            Box::leak(Box::new(HnswIo::new(&self.collection_root, GRAPH_BASENAME)));
        let graph: Hnsw<'static, f32, DistCosine> = reload
            .load_hnsw()
            .map_err(|e| HnswError::Graph(e.to_string()))?;

        let handle = std::sync::Arc::new(IndexHandle {
            graph,
            vector_count_at_last_build: mapping.id_to_internal.len(),
            mapping,
        });
        *self.handle.write().unwrap() = Some(handle.clone());
        Ok(Some(handle))
    }

    /// If stale or missing, rebuild then load; if fresh, load. The
    /// searcher-side half of the staleness-coordination protocol.
    pub fn ensure_fresh(&self, store: &VectorStore, collection: &str) -> HnswResult<std::sync::Arc<IndexHandle>> {
        if self.is_stale() {
            debug!(collection, "HNSW index stale or missing, rebuilding before search");
            self.build(store, collection)?;
        }
        match self.load()? {
            Some(handle) => Ok(handle),
            None => {
                warn!(collection, "HNSW graph absent after build, rebuilding once more");
                self.build(store, collection)?;
                self.load()?.ok_or_else(|| HnswError::Graph("graph missing after rebuild".into()))
            }
        }
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> HnswResult<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use crate::record::Record;

    fn store_with_vectors(dir: &Path, vectors: &[(&str, Vec<f32>)]) -> VectorStore {
        let store = VectorStore::open(dir.to_path_buf());
        store.create_collection("c", vectors[0].1.len()).unwrap();
        let records = vectors
            .iter()
            .map(|(id, v)| Record::new(*id, v.clone(), Payload::new()))
            .collect::<Vec<_>>();
        store.upsert_points("c", None, records, None).unwrap();
        store
    }

    #[test]
    fn build_then_search_finds_nearest_neighbor() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_vectors(
            dir.path(),
            &[
                ("a", vec![1.0, 0.0, 0.0]),
                ("b", vec![0.0, 1.0, 0.0]),
                ("c", vec![0.9, 0.1, 0.0]),
            ],
        );
        let manager = HnswIndexManager::new(dir.path().join("hnsw").join("c"));
        manager.build(&store, "c").unwrap();
        let handle = manager.load().unwrap().unwrap();
        let results = handle.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn mark_stale_is_detected_by_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let manager = HnswIndexManager::new(dir.path().join("hnsw").join("c"));
        std::fs::create_dir_all(dir.path().join("hnsw").join("c")).unwrap();
        assert!(manager.is_stale());
        manager.mark_stale().unwrap();
        assert!(manager.is_stale());
    }

    #[test]
    fn ensure_fresh_rebuilds_when_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_vectors(dir.path(), &[("a", vec![1.0, 0.0])]);
        let manager = HnswIndexManager::new(dir.path().join("hnsw").join("c"));
        let handle = manager.ensure_fresh(&store, "c").unwrap();
        assert_eq!(handle.vector_count_at_last_build, 1);
        assert!(!manager.is_stale());
    }
}
