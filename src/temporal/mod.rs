//! C8: the SQLite sidecar that lets the temporal collection (commit-diff
//! content, indexed by point ids that concatenate project + diff + commit
//! hash + file path + chunk index, easily past 255 bytes) use fixed-length
//! filenames on disk. Ported in semantics from
//! `original_source/storage/temporal_metadata_store.py`'s schema and
//! v1/v2 format-detection rule, onto `sqlx`'s `SqlitePool`.
//!
//! The rest of this crate is synchronous (spec: only the daemon runs an
//! async reactor), but `sqlx`'s pool API is async-only. Rather than thread
//! `tokio` through every store call, `TemporalDb` owns a small
//! single-threaded runtime and calls `block_on` per operation internally —
//! the same shape as `indexes/caching.rs`'s `block_in_place` usage,
//! inverted for a caller that starts with no ambient runtime at all.

mod error;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

pub use error::{TemporalError, TemporalResult};

use crate::quantizer::id_hash;

pub const TEMPORAL_COLLECTION_NAME: &str = "code-indexer-temporal";
pub const METADATA_DB_NAME: &str = "temporal_metadata.db";
const FORMAT_VERSION: i64 = 2;

pub fn is_temporal_collection(name: &str) -> bool {
    name == TEMPORAL_COLLECTION_NAME
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemporalFormat {
    /// `temporal_metadata.db` is present: hash-based filenames, metadata
    /// recoverable.
    V2,
    /// No sidecar database: the legacy format this store refuses to read.
    V1,
}

/// Detects format by the sole signal spec.md §4.8 names: presence of
/// `temporal_metadata.db` beside the collection root.
pub fn detect_format(collection_root: &Path) -> TemporalFormat {
    if collection_root.join(METADATA_DB_NAME).exists() {
        TemporalFormat::V2
    } else {
        TemporalFormat::V1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemporalRow {
    pub hash_prefix: String,
    pub point_id: String,
    pub commit_hash: Option<String>,
    pub file_path: Option<String>,
    pub chunk_index: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Per-collection handle onto the sidecar database. Construction fails
/// fatally ([`TemporalError::LegacyFormat`]) if the collection is v1;
/// callers must not attempt to read v1 data at all, per spec.md §4.8 and
/// §7 (`TemporalFormatError`).
pub struct TemporalDb {
    pool: SqlitePool,
    runtime: tokio::runtime::Runtime,
    db_path: PathBuf,
}

impl TemporalDb {
    /// Opens (or creates, if the collection is brand new) the v2 sidecar.
    /// A collection that already has *records* but no sidecar is legacy
    /// v1 and is refused; `force_create` is only set for a collection
    /// being created for the very first time (no records at all yet).
    pub fn open(collection_root: &Path, force_create: bool) -> TemporalResult<Self> {
        if !force_create && detect_format(collection_root) == TemporalFormat::V1 {
            return Err(TemporalError::LegacyFormat {
                collection_path: collection_root.to_path_buf(),
            });
        }
        std::fs::create_dir_all(collection_root)?;
        let db_path = collection_root.join(METADATA_DB_NAME);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let pool = runtime.block_on(async {
            let options = SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS temporal_metadata (
                    hash_prefix TEXT PRIMARY KEY,
                    point_id TEXT NOT NULL UNIQUE,
                    commit_hash TEXT,
                    file_path TEXT,
                    chunk_index INTEGER,
                    created_at TEXT NOT NULL,
                    format_version INTEGER NOT NULL DEFAULT 2
                )",
            )
            .execute(&pool)
            .await?;
            sqlx::query("CREATE INDEX IF NOT EXISTS idx_point_id ON temporal_metadata(point_id)")
                .execute(&pool)
                .await?;
            sqlx::query("CREATE INDEX IF NOT EXISTS idx_commit_hash ON temporal_metadata(commit_hash)")
                .execute(&pool)
                .await?;
            sqlx::query("CREATE INDEX IF NOT EXISTS idx_file_path ON temporal_metadata(file_path)")
                .execute(&pool)
                .await?;
            Ok::<_, sqlx::Error>(pool)
        })?;

        Ok(Self { pool, runtime, db_path })
    }

    /// 16 hex chars of SHA-256(point_id) — shared with the general store's
    /// [`crate::quantizer::id_hash`], since the temporal collection's
    /// `point_id` is just an unusually long record id. Kept as a single
    /// source of truth rather than re-deriving the same hash two ways.
    pub fn hash_prefix(point_id: &str) -> String {
        id_hash(point_id)
    }

    pub fn record_filename(point_id: &str) -> String {
        format!("vector_{}.json", Self::hash_prefix(point_id))
    }

    /// Insert or replace a row for `point_id`, returning its hash prefix
    /// (the filename component the caller should write the record under).
    pub fn save_metadata(
        &self,
        point_id: &str,
        commit_hash: Option<&str>,
        file_path: Option<&str>,
        chunk_index: Option<i64>,
    ) -> TemporalResult<String> {
        let hash_prefix = Self::hash_prefix(point_id);
        let created_at = Utc::now();
        self.runtime.block_on(async {
            sqlx::query(
                "INSERT OR REPLACE INTO temporal_metadata
                 (hash_prefix, point_id, commit_hash, file_path, chunk_index, created_at, format_version)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&hash_prefix)
            .bind(point_id)
            .bind(commit_hash)
            .bind(file_path)
            .bind(chunk_index)
            .bind(created_at.to_rfc3339())
            .bind(FORMAT_VERSION)
            .execute(&self.pool)
            .await
        })?;
        Ok(hash_prefix)
    }

    pub fn get_point_id(&self, hash_prefix: &str) -> TemporalResult<Option<String>> {
        let row = self.runtime.block_on(async {
            sqlx::query("SELECT point_id FROM temporal_metadata WHERE hash_prefix = ?")
                .bind(hash_prefix)
                .fetch_optional(&self.pool)
                .await
        })?;
        Ok(row.map(|r| r.get::<String, _>("point_id")))
    }

    pub fn get_metadata(&self, hash_prefix: &str) -> TemporalResult<Option<TemporalRow>> {
        let row = self.runtime.block_on(async {
            sqlx::query(
                "SELECT hash_prefix, point_id, commit_hash, file_path, chunk_index, created_at
                 FROM temporal_metadata WHERE hash_prefix = ?",
            )
            .bind(hash_prefix)
            .fetch_optional(&self.pool)
            .await
        })?;
        Ok(row.map(|r| TemporalRow {
            hash_prefix: r.get("hash_prefix"),
            point_id: r.get("point_id"),
            commit_hash: r.get("commit_hash"),
            file_path: r.get("file_path"),
            chunk_index: r.get("chunk_index"),
            created_at: DateTime::parse_from_rfc3339(r.get::<String, _>("created_at").as_str())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    pub fn delete_metadata(&self, hash_prefix: &str) -> TemporalResult<()> {
        self.runtime.block_on(async {
            sqlx::query("DELETE FROM temporal_metadata WHERE hash_prefix = ?")
                .bind(hash_prefix)
                .execute(&self.pool)
                .await
        })?;
        Ok(())
    }

    /// Delete every row whose `hash_prefix` isn't in `valid_prefixes` (e.g.
    /// not backed by a `vector_*.json` file any more). Returns the number
    /// of rows removed.
    pub fn cleanup_stale(&self, valid_prefixes: &HashSet<String>) -> TemporalResult<usize> {
        let all: Vec<String> = self.runtime.block_on(async {
            sqlx::query("SELECT hash_prefix FROM temporal_metadata")
                .fetch_all(&self.pool)
                .await
                .map(|rows| rows.iter().map(|r| r.get::<String, _>("hash_prefix")).collect())
        })?;

        let stale: Vec<&String> = all.iter().filter(|p| !valid_prefixes.contains(*p)).collect();
        if stale.is_empty() {
            return Ok(0);
        }
        self.runtime.block_on(async {
            for prefix in &stale {
                sqlx::query("DELETE FROM temporal_metadata WHERE hash_prefix = ?")
                    .bind(prefix.as_str())
                    .execute(&self.pool)
                    .await?;
            }
            Ok::<_, sqlx::Error>(())
        })?;
        info!(count = stale.len(), "cleaned up stale temporal metadata rows");
        Ok(stale.len())
    }

    pub fn count_entries(&self) -> TemporalResult<i64> {
        let row = self
            .runtime
            .block_on(async { sqlx::query("SELECT COUNT(*) AS n FROM temporal_metadata").fetch_one(&self.pool).await })?;
        Ok(row.get::<i64, _>("n"))
    }
}

/// The reconcile-reindex migration: wipe every `vector_*.json` file and the
/// metadata database itself, then recreate an empty v2 sidecar. The actual
/// full rebuild (re-chunking and re-embedding every commit) is the CLI
/// command's job, out of scope here; this function only clears the ground
/// for it.
pub fn reconcile_reindex(collection_root: &Path) -> TemporalResult<()> {
    warn!(path = %collection_root.display(), "reconciling temporal collection: deleting all records and metadata");
    if collection_root.exists() {
        for entry in walk_vector_files(collection_root) {
            let _ = std::fs::remove_file(entry);
        }
    }
    let db_path = collection_root.join(METADATA_DB_NAME);
    if db_path.exists() {
        std::fs::remove_file(&db_path)?;
    }
    let wal = db_path.with_extension("db-wal");
    let shm = db_path.with_extension("db-shm");
    let _ = std::fs::remove_file(wal);
    let _ = std::fs::remove_file(shm);
    // The general store's id index would otherwise still point at the
    // files just deleted above.
    let _ = std::fs::remove_file(collection_root.join("id_index.bin"));
    let _ = std::fs::remove_file(collection_root.join("id_index.log"));
    TemporalDb::open(collection_root, true)?;
    Ok(())
}

fn walk_vector_files(root: &Path) -> Vec<PathBuf> {
    fn visit(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && depth < 6 {
                visit(&path, depth + 1, out);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("vector_") && n.ends_with(".json"))
            {
                out.push(path);
            }
        }
    }
    let mut out = Vec::new();
    visit(root, 0, &mut out);
    out
}

impl Drop for TemporalDb {
    fn drop(&mut self) {
        tracing::debug!(path = %self.db_path.display(), "closing temporal metadata db");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_collection_detects_as_v1_until_opened() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_format(dir.path()), TemporalFormat::V1);
    }

    #[test]
    fn opening_v1_collection_without_force_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vector_deadbeefdeadbeef.json"), b"{}").unwrap();
        let err = TemporalDb::open(dir.path(), false).unwrap_err();
        match err {
            TemporalError::LegacyFormat { collection_path } => {
                assert_eq!(collection_path, dir.path());
                let msg = err_display(&collection_path);
                assert!(msg.contains("reconcile"));
            }
            other => panic!("expected LegacyFormat, got {other:?}"),
        }
    }

    fn err_display(path: &Path) -> String {
        TemporalError::LegacyFormat { collection_path: path.to_path_buf() }.to_string()
    }

    #[test]
    fn force_create_then_reopen_detects_as_v2() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _db = TemporalDb::open(dir.path(), true).unwrap();
        }
        assert_eq!(detect_format(dir.path()), TemporalFormat::V2);
        TemporalDb::open(dir.path(), false).unwrap();
    }

    #[test]
    fn long_point_id_roundtrips_through_hash_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let db = TemporalDb::open(dir.path(), true).unwrap();
        let point_id = "a".repeat(200) + ":deadbeefcafef00d:src/very/deeply/nested/package/module.py:3";
        assert!(point_id.len() > 255);

        let prefix = db.save_metadata(&point_id, Some("deadbeef"), Some("src/module.py"), Some(3)).unwrap();
        assert_eq!(prefix.len(), 16);
        assert_eq!(TemporalDb::record_filename(&point_id).len(), 28);

        let recovered = db.get_point_id(&prefix).unwrap();
        assert_eq!(recovered.as_deref(), Some(point_id.as_str()));
    }

    #[test]
    fn cleanup_stale_removes_rows_without_a_surviving_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = TemporalDb::open(dir.path(), true).unwrap();
        let keep = db.save_metadata("keep-id", None, None, None).unwrap();
        let drop_me = db.save_metadata("drop-id", None, None, None).unwrap();

        let mut valid = HashSet::new();
        valid.insert(keep.clone());
        let removed = db.cleanup_stale(&valid).unwrap();

        assert_eq!(removed, 1);
        assert!(db.get_point_id(&keep).unwrap().is_some());
        assert!(db.get_point_id(&drop_me).unwrap().is_none());
    }

    #[test]
    fn reconcile_reindex_clears_records_and_recreates_empty_v2_db() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = TemporalDb::open(dir.path(), true).unwrap();
            db.save_metadata("some-id", None, None, None).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("00/11/22/33")).unwrap();
        std::fs::write(dir.path().join("00/11/22/33/vector_abc.json"), b"{}").unwrap();

        reconcile_reindex(dir.path()).unwrap();

        assert_eq!(detect_format(dir.path()), TemporalFormat::V2);
        let db = TemporalDb::open(dir.path(), false).unwrap();
        assert_eq!(db.count_entries().unwrap(), 0);
        assert!(!dir.path().join("00/11/22/33/vector_abc.json").exists());
    }
}
