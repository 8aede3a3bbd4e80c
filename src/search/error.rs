use thiserror::Error;

use crate::hnsw::HnswError;
use crate::search::traits::EmbeddingError;
use crate::store::error::StoreError;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Hnsw(#[from] HnswError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SearchResult<T> = Result<T, SearchError>;
