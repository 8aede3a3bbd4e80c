//! Per-collection on-disk state: metadata, the (write-once) projection
//! matrix, and the loaded id index. Shared read-only across threads, per
//! the "Projection matrix: owned by the store; loaded on first use; shared
//! read-only" policy.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quantizer::ProjectionMatrix;
use crate::temporal::{is_temporal_collection, TemporalDb};

use super::error::{StoreError, StoreResult};
use super::id_index::IdIndex;

pub const COLLECTION_META_FILE: &str = "collection_meta.json";
pub const PROJECTION_MATRIX_FILE: &str = "projection_matrix.npy";
pub const HNSW_STALE_MARKER: &str = "hnsw.stale";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub name: String,
    pub vector_size: usize,
    pub created_at: DateTime<Utc>,
}

/// All in-process state for one collection. Created once per collection
/// name and cached by the store for the lifetime of the process.
pub struct CollectionHandle {
    pub root: PathBuf,
    pub meta: CollectionMeta,
    pub matrix: ProjectionMatrix,
    pub id_index: IdIndex,
    /// Only populated for the dedicated temporal (commit-diff) collection;
    /// `None` for every other collection.
    pub temporal: Option<std::sync::Mutex<TemporalDb>>,
    /// Advisory "we're in a write burst" flag set by `begin_indexing`, read
    /// by `end_indexing` to decide whether to rebuild HNSW immediately.
    pub indexing: AtomicBool,
}

impl CollectionHandle {
    pub fn create(root: PathBuf, name: &str, vector_size: usize) -> StoreResult<Self> {
        std::fs::create_dir_all(&root)?;
        let meta_path = root.join(COLLECTION_META_FILE);
        let matrix_path = root.join(PROJECTION_MATRIX_FILE);
        let is_new = !(meta_path.exists() && matrix_path.exists());

        let (meta, matrix) = if !is_new {
            // Idempotent: collection already exists, don't regenerate.
            let meta = read_meta(&meta_path)?;
            let matrix = read_matrix(&matrix_path)?;
            (meta, matrix)
        } else {
            let meta = CollectionMeta {
                name: name.to_owned(),
                vector_size,
                created_at: Utc::now(),
            };
            let matrix = ProjectionMatrix::random(vector_size);
            write_atomic(&meta_path, serde_json::to_vec_pretty(&meta)?.as_slice())?;
            write_atomic(&matrix_path, &serialize_matrix(&matrix))?;
            (meta, matrix)
        };

        let id_index = match IdIndex::load(&root) {
            Ok(index) => index,
            Err(_) => IdIndex::rebuild_by_scan(&root)?,
        };

        let temporal = if is_temporal_collection(name) {
            Some(std::sync::Mutex::new(TemporalDb::open(&root, is_new)?))
        } else {
            None
        };

        Ok(Self {
            root,
            meta,
            matrix,
            id_index,
            temporal,
            indexing: AtomicBool::new(false),
        })
    }

    pub fn open(root: PathBuf) -> StoreResult<Self> {
        let meta_path = root.join(COLLECTION_META_FILE);
        if !meta_path.exists() {
            return Err(StoreError::CollectionNotFound(
                root.to_string_lossy().into_owned(),
            ));
        }
        let meta = read_meta(&meta_path)?;
        let matrix = read_matrix(&root.join(PROJECTION_MATRIX_FILE))?;
        let id_index = match IdIndex::load(&root) {
            Ok(index) => index,
            Err(_) => IdIndex::rebuild_by_scan(&root)?,
        };
        let temporal = if is_temporal_collection(&meta.name) {
            // An already-existing collection directory; a missing sidecar
            // here really is legacy v1, not first-time creation.
            Some(std::sync::Mutex::new(TemporalDb::open(&root, false)?))
        } else {
            None
        };
        Ok(Self {
            root,
            meta,
            matrix,
            id_index,
            temporal,
            indexing: AtomicBool::new(false),
        })
    }

    pub fn stale_marker_path(&self) -> PathBuf {
        self.root.join(HNSW_STALE_MARKER)
    }

    pub fn begin_indexing(&self) {
        self.indexing.store(true, Ordering::SeqCst);
    }

    pub fn end_indexing(&self) {
        self.indexing.store(false, Ordering::SeqCst);
    }

    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::SeqCst)
    }
}

fn read_meta(path: &Path) -> StoreResult<CollectionMeta> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Minimal `.npy`-style dump: an 8-byte header (`vector_size`, `cols` as
/// little-endian u32s) followed by the row-major f32 data. Implementers
/// only need to load what they wrote, so the real numpy format isn't
/// required — just something self-describing and stable.
fn serialize_matrix(matrix: &ProjectionMatrix) -> Vec<u8> {
    let cols = if matrix.vector_size == 0 {
        0
    } else {
        matrix.data.len() / matrix.vector_size
    };
    let mut out = Vec::with_capacity(8 + matrix.data.len() * 4);
    out.extend_from_slice(&(matrix.vector_size as u32).to_le_bytes());
    out.extend_from_slice(&(cols as u32).to_le_bytes());
    for value in &matrix.data {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn read_matrix(path: &Path) -> StoreResult<ProjectionMatrix> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < 8 {
        return Err(StoreError::IdIndexCorrupt(
            "projection matrix header truncated".into(),
        ));
    }
    let vector_size = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let cols = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let expected_len = 8 + vector_size * cols * 4;
    if bytes.len() < expected_len {
        return Err(StoreError::IdIndexCorrupt(
            "projection matrix data truncated".into(),
        ));
    }
    let mut data = Vec::with_capacity(vector_size * cols);
    for chunk in bytes[8..expected_len].chunks_exact(4) {
        data.push(f32::from_le_bytes(chunk.try_into().unwrap()));
    }
    Ok(ProjectionMatrix { vector_size, data })
}

/// Write via a sibling `.tmp` file with `0o600` mode, then rename. Used for
/// every record and metadata write in the store.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp_path)?;
        use std::io::Write;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(&tmp_path, bytes)?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("c");
        let first = CollectionHandle::create(root.clone(), "c", 4).unwrap();
        let second = CollectionHandle::create(root, "c", 4).unwrap();
        assert_eq!(first.matrix.data, second.matrix.data);
    }

    #[test]
    fn matrix_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("c");
        let created = CollectionHandle::create(root.clone(), "c", 4).unwrap();
        let matrix = read_matrix(&root.join(PROJECTION_MATRIX_FILE)).unwrap();
        assert_eq!(matrix.data, created.matrix.data);
        assert_eq!(matrix.vector_size, 4);
    }

    #[test]
    fn open_missing_collection_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = CollectionHandle::open(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
    }
}
