use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Configuration {
    #[clap(long, default_value_os_t = default_repo_root())]
    #[serde(default = "default_repo_root")]
    /// Repository the daemon serves; its `.code-indexer/` subdirectory
    /// holds the vector store, HNSW graph, FTS index, and daemon socket
    pub repo_root: PathBuf,

    #[clap(long, default_value_t = default_collection())]
    #[serde(default = "default_collection")]
    /// Collection name within the vector store
    pub collection: String,

    #[clap(long, default_value_os_t = default_index_dir())]
    #[serde(default = "default_index_dir")]
    /// Directory to store persistent daemon state (logs, pid file)
    pub index_dir: PathBuf,

    #[clap(long, default_value_os_t = default_model_dir())]
    #[serde(default = "default_model_dir")]
    /// Path to the embedding model directory
    pub model_dir: PathBuf,

    #[clap(long, default_value_t = default_ttl_minutes())]
    #[serde(default = "default_ttl_minutes")]
    /// Minutes of inactivity before the query-result cache is dropped
    pub ttl_minutes: u64,
}

impl Configuration {
    /// Directory where logs are written to
    pub fn log_dir(&self) -> PathBuf {
        self.index_dir.join("logs")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.repo_root.join(".code-indexer").join("daemon.sock")
    }
}

fn default_repo_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| ".".into())
}

fn default_collection() -> String {
    "code".to_owned()
}

fn default_index_dir() -> PathBuf {
    match directories::ProjectDirs::from("ai", "codestory", "codeindexer") {
        Some(dirs) => dirs.data_dir().to_owned(),
        None => "codeindexer".into(),
    }
}

fn default_model_dir() -> PathBuf {
    "model".into()
}

fn default_ttl_minutes() -> u64 {
    10
}
