//! In-process file watcher, one per watched repository, running on its
//! own OS thread — grounded on `bg_poll/background_polling.rs`'s
//! `Poller`, stripped of the git-sync polling loop that module also
//! does (not relevant to this crate) and kept to just the
//! debounced-filesystem-events half.
//!
//! What happens to a detected change is left to a caller-supplied hook:
//! this library has no concrete [`EmbeddingProvider`](crate::search::traits::EmbeddingProvider)
//! or [`Chunker`](crate::search::traits::Chunker) to re-embed changed
//! files with, so `watch_start` wires in whatever reindex strategy the
//! host binary configured (typically: chunk + embed the touched paths,
//! `upsert_points` with `skip_hnsw_rebuild=true`, then `mark_stale`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{
    new_debouncer,
    notify::RecursiveMode,
    DebounceEventResult, Debouncer,
};
use tracing::{error, info, warn};

pub type ChangeHook = dyn Fn(Vec<PathBuf>) + Send + Sync;

const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

pub struct FileWatcher {
    _debouncer: Debouncer<notify_debouncer_mini::notify::RecommendedWatcher>,
}

impl FileWatcher {
    pub fn start(repo_root: &Path, on_change: Arc<ChangeHook>) -> std::io::Result<Self> {
        let mut debouncer = new_debouncer(DEBOUNCE_WINDOW, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                    if !paths.is_empty() {
                        on_change(paths);
                    }
                }
                Err(e) => error!(error = %e, "file watcher event channel error"),
            }
        })
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

        debouncer
            .watcher()
            .watch(repo_root, RecursiveMode::Recursive)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

        info!(path = %repo_root.display(), "file watcher started");
        Ok(Self { _debouncer: debouncer })
    }
}

/// Default hook used when the host binary hasn't wired a chunker/embedder
/// in: it only marks the index stale, deferring the actual rebuild to the
/// next `index` RPC (or the staleness the search path already tolerates).
pub fn mark_stale_hook(entry: Arc<super::cache::CacheEntry>) -> Arc<ChangeHook> {
    Arc::new(move |paths| {
        warn!(count = paths.len(), "files changed; marking hnsw index stale");
        if let Err(e) = entry.mark_index_stale() {
            error!(error = %e, "failed to mark hnsw index stale after file change");
        }
    })
}
