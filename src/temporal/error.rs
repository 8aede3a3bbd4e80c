use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemporalError {
    /// A v1 (legacy, no metadata sidecar) temporal collection was opened.
    /// Fatal: the store must not attempt to read v1 filenames back into
    /// point ids, since the mapping was never persisted anywhere.
    #[error("legacy v1 temporal index format detected at {collection_path:?}; re-index required, run `codeindexer reconcile --temporal {collection_path:?}`")]
    LegacyFormat { collection_path: PathBuf },

    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TemporalResult<T> = Result<T, TemporalError>;
