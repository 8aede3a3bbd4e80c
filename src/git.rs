pub mod metadata;

pub use metadata::{file_commit_metadata, FileCommitMetadata};
