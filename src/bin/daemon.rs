// The long-running cache daemon: one process per repository, listening
// on a Unix socket under `<repo>/.code-indexer/daemon.sock`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use codeindexer::application::application::Application;
use codeindexer::application::config::configuration::Configuration;
use codeindexer::daemon::server::Daemon;
use codeindexer::search::traits::{EmbeddingProvider, NullEmbeddingProvider};
use codeindexer::store::VectorStore;

#[tokio::main]
async fn main() -> Result<()> {
    let configuration = Configuration::parse();
    Application::install_logging(&configuration);
    info!(repo = %configuration.repo_root.display(), "starting daemon");

    let socket_path = configuration.socket_path();
    if socket_path.exists() {
        if is_daemon_alive(&socket_path).await {
            anyhow::bail!("a daemon is already running at {}", socket_path.display());
        }
        info!(path = %socket_path.display(), "removing stale socket from a previous run");
        std::fs::remove_file(&socket_path).context("removing stale daemon socket")?;
    }

    let store_root = configuration.repo_root.join(".code-indexer").join("store");
    let store = Arc::new(VectorStore::open(store_root));
    store
        .create_collection(&configuration.collection, embedding_dimension())
        .context("opening vector store collection")?;

    // TODO(codeindexer): wire a real embedding backend via `model_dir`
    // once one is selected; until then daemon-side semantic search uses
    // a deterministic stand-in so the RPC surface is exercisable end to end.
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(NullEmbeddingProvider {
        dimension: embedding_dimension(),
    });

    let daemon = Arc::new(Daemon::new(
        configuration.repo_root.clone(),
        store,
        configuration.collection.clone(),
        embedder,
        configuration.ttl_minutes,
    ));

    let handle = daemon.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down daemon");
            handle.request_shutdown();
        }
    });

    if let Err(err) = daemon.run().await {
        error!(error = %err, "daemon exited with an error");
        return Err(err.into());
    }
    Ok(())
}

fn embedding_dimension() -> usize {
    768
}

/// A socket file can outlive its daemon (crash, kill -9). Connecting is
/// the only reliable liveness check; a refused connection means the
/// socket is stale and safe to remove.
async fn is_daemon_alive(socket_path: &std::path::Path) -> bool {
    tokio::net::UnixStream::connect(socket_path).await.is_ok()
}
