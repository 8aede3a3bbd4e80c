use thiserror::Error;

#[derive(Debug, Error)]
pub enum HnswError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] crate::store::error::StoreError),
    #[error("hnsw graph error: {0}")]
    Graph(String),
}

pub type HnswResult<T> = Result<T, HnswError>;
