use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("a shutdown is already in flight")]
    ShutdownInFlight,
    #[error("could not acquire the daemon lock: {0}")]
    LockUnavailable(String),
    #[error("the daemon socket at {0:?} is already in use")]
    AlreadyRunning(std::path::PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Search(#[from] crate::search::SearchError),
    #[error(transparent)]
    Hnsw(#[from] crate::hnsw::HnswError),
    #[error(transparent)]
    Store(#[from] crate::store::error::StoreError),
}

pub type DaemonResult<T> = Result<T, DaemonError>;
