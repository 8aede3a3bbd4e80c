//! The accept loop, request dispatch, TTL-eviction background task, and
//! graceful shutdown sequence. One [`Daemon`] serves one repository and
//! one collection, listening on a Unix socket under that repo's
//! `.code-indexer/` directory — grounded on `bin/webserver.rs`'s
//! `run()`/`JoinSet` shape, transport swapped for
//! `tokio::net::UnixListener`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::search::traits::EmbeddingProvider;
use crate::store::VectorStore;

use super::cache::CacheEntry;
use super::error::{DaemonError, DaemonResult};
use super::protocol::{self, Request, Response, ResponseBody, StatusReport};
use super::watcher::{mark_stale_hook, FileWatcher};

const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

pub struct Daemon {
    socket_path: PathBuf,
    entry: Arc<CacheEntry>,
    embedder: Arc<dyn EmbeddingProvider>,
    watcher: std::sync::Mutex<Option<FileWatcher>>,
    shutdown: Arc<Notify>,
    shutting_down: AtomicBool,
}

/// A cheap handle a caller can use to ask a running [`Daemon`] to stop,
/// without holding a reference to the daemon itself (e.g. from a signal
/// handler installed in the host binary).
#[derive(Clone)]
pub struct DaemonHandle {
    shutdown: Arc<Notify>,
}

impl DaemonHandle {
    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }
}

impl Daemon {
    pub fn new(
        repo_root: PathBuf,
        store: Arc<VectorStore>,
        collection: String,
        embedder: Arc<dyn EmbeddingProvider>,
        ttl_minutes: u64,
    ) -> Self {
        let socket_path = repo_root.join(".code-indexer").join("daemon.sock");
        let entry = Arc::new(CacheEntry::new(repo_root, store, collection, ttl_minutes));
        Self {
            socket_path,
            entry,
            embedder,
            watcher: std::sync::Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Binds the socket (failing with [`DaemonError::AlreadyRunning`] if a
    /// stale or live socket file is already present — the caller is
    /// expected to have already checked for a live daemon and cleaned up
    /// a dead one before calling this), then serves requests until a
    /// `shutdown` RPC or an external [`DaemonHandle::request_shutdown`]
    /// fires.
    pub async fn run(self: Arc<Self>) -> DaemonResult<()> {
        if self.socket_path.exists() {
            return Err(DaemonError::AlreadyRunning(self.socket_path.clone()));
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "daemon listening");

        let eviction = tokio::spawn(Self::eviction_task(self.entry.clone(), self.shutdown.clone()));

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let this = self.clone();
                            tokio::spawn(async move { this.handle_connection(stream).await; });
                        }
                        Err(e) => warn!(error = %e, "daemon accept error"),
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }

        // 6-step graceful shutdown: stop accepting, drain the eviction
        // task, drop the watcher, clear in-memory state, unlink the
        // socket, then signal our own process to guarantee the runtime
        // actually exits rather than leaving a stray event loop alive.
        eviction.abort();
        *self.watcher.lock().unwrap() = None;
        self.entry.clear_cache();
        let _ = std::fs::remove_file(&self.socket_path);
        info!("daemon shut down cleanly");
        self_terminate();
        Ok(())
    }

    async fn eviction_task(entry: Arc<CacheEntry>, shutdown: Arc<Notify>) {
        let mut interval = tokio::time::interval(EVICTION_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if entry.is_expired() {
                        entry.clear_cache();
                        debug!("evicted idle query cache past ttl");
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: UnixStream) {
        loop {
            let request = match protocol::read_frame::<Request, _>(&mut stream).await {
                Ok(Some(request)) => request,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "daemon connection read error");
                    return;
                }
            };
            let is_shutdown = matches!(request, Request::Shutdown);
            let response = self.dispatch(request).await;
            if protocol::write_frame(&mut stream, &response).await.is_err() {
                return;
            }
            if is_shutdown {
                return;
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Response {
        match self.dispatch_inner(request).await {
            Ok(body) => Response::Ok { result: body },
            Err(e) => Response::Error { message: e.to_string() },
        }
    }

    async fn dispatch_inner(&self, request: Request) -> DaemonResult<ResponseBody> {
        match request {
            Request::Query { collection: _, query_text, options } => {
                let entry = self.entry.clone();
                let embedder = self.embedder.clone();
                tokio::task::spawn_blocking(move || {
                    let (response, cache_hit) = entry.query(embedder.as_ref(), &query_text, &options)?;
                    Ok(ResponseBody::Search {
                        results: response.results,
                        cache_hit,
                        total_ms: response.timing.total_ms,
                    })
                })
                .await
                .expect("search task panicked")
            }
            Request::QueryFts { query_text, options } => {
                let entry = self.entry.clone();
                tokio::task::spawn_blocking(move || {
                    let response = entry.query_fts(&query_text, &options);
                    ResponseBody::Search {
                        results: response.results,
                        cache_hit: false,
                        total_ms: 0,
                    }
                })
                .await
                .map_err(|_| DaemonError::LockUnavailable("fts search task panicked".to_owned()))
            }
            Request::QueryHybrid { collection: _, query_text, options } => {
                let entry = self.entry.clone();
                let embedder = self.embedder.clone();
                tokio::task::spawn_blocking(move || {
                    let (results, cache_hit) = entry.query_hybrid(embedder.as_ref(), &query_text, &options)?;
                    Ok(ResponseBody::Hybrid { results, cache_hit, total_ms: 0 })
                })
                .await
                .expect("hybrid search task panicked")
            }
            Request::Index { collection: _ } => {
                let entry = self.entry.clone();
                tokio::task::spawn_blocking(move || entry.index().map(|count| ResponseBody::Index { count }))
                    .await
                    .expect("index task panicked")
            }
            Request::WatchStart => {
                let mut guard = self.watcher.lock().unwrap();
                if guard.is_none() {
                    let hook = mark_stale_hook(self.entry.clone());
                    let watcher = FileWatcher::start(&self.entry.repo_root, hook)?;
                    *guard = Some(watcher);
                    self.entry.set_watching(true);
                }
                Ok(ResponseBody::Watch { running: true })
            }
            Request::WatchStop => {
                *self.watcher.lock().unwrap() = None;
                self.entry.set_watching(false);
                Ok(ResponseBody::Watch { running: false })
            }
            Request::WatchStatus => Ok(ResponseBody::Watch {
                running: self.entry.is_watching(),
            }),
            Request::Clean => {
                let entry = self.entry.clone();
                tokio::task::spawn_blocking(move || entry.clean().map(|_| ResponseBody::Ack))
                    .await
                    .expect("clean task panicked")
            }
            Request::CleanData => {
                let entry = self.entry.clone();
                tokio::task::spawn_blocking(move || entry.clean_data().map(|_| ResponseBody::Ack))
                    .await
                    .expect("clean_data task panicked")
            }
            Request::Status => Ok(ResponseBody::Status(StatusReport {
                last_accessed_unix: self.entry.last_accessed(),
                access_count: self.entry.access_count(),
                ttl_minutes: self.entry.ttl_minutes,
                hnsw_loaded: self.entry.hnsw_loaded(),
                fts_loaded: self.entry.fts_loaded(),
                memo_size: self.entry.memo_size(),
                watching: self.entry.is_watching(),
            })),
            Request::ClearCache => {
                self.entry.clear_cache();
                Ok(ResponseBody::Ack)
            }
            Request::Shutdown => {
                if self.shutting_down.swap(true, Ordering::SeqCst) {
                    return Err(DaemonError::ShutdownInFlight);
                }
                self.shutdown.notify_one();
                Ok(ResponseBody::Ack)
            }
        }
    }
}

/// Sends this process a termination signal so the OS reclaims it even if
/// some task tree fails to unwind cleanly — the last of the 6 shutdown
/// steps, matching spec.md's requirement that shutdown guarantee process
/// exit rather than rely on every spawned task noticing a flag.
#[cfg(unix)]
fn self_terminate() {
    unsafe {
        libc::kill(std::process::id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn self_terminate() {
    std::process::exit(0);
}
