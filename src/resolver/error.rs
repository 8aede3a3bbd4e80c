use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("git subprocess timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("git subprocess failed: {0}")]
    GitFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ResolverResult<T> = Result<T, ResolverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_formats_duration() {
        let err = ResolverError::Timeout(std::time::Duration::from_secs(5));
        assert!(err.to_string().contains("5s"));
    }
}
