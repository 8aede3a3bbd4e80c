use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("dimension mismatch: collection {collection} expects {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("id index corrupt: {0}")]
    IdIndexCorrupt(String),

    #[error("write failed for id {id}: {source}")]
    WriteFailed { id: String, source: std::io::Error },

    #[error(transparent)]
    Temporal(#[from] crate::temporal::TemporalError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_not_found_message_contains_name() {
        let err = StoreError::CollectionNotFound("commits".into());
        assert!(err.to_string().contains("commits"));
    }

    #[test]
    fn dimension_mismatch_message_contains_both_sizes() {
        let err = StoreError::DimensionMismatch {
            collection: "c".into(),
            expected: 4,
            actual: 8,
        };
        let msg = err.to_string();
        assert!(msg.contains('4'));
        assert!(msg.contains('8'));
    }
}
