//! Per-project cache entry: lazily-loaded HNSW/FTS handles, a bounded
//! TTL'd query-result memo, and the reader/writer + write-mutex
//! concurrency split spec.md §4.7 requires. Every method here is
//! synchronous/blocking by design (it calls straight into the store,
//! HNSW, and FTS modules) — the async RPC layer runs it via
//! `spawn_blocking`, the same "keep blocking work off the async
//! reactor" shape as the teacher's `block_in_place` usage in
//! `indexes/caching.rs`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::fts::{self, FtsIndexManager};
use crate::hnsw::HnswIndexManager;
use crate::search::{HybridResult, SearchExecutor, SearchOptions, SemanticSearchResponse};
use crate::search::traits::EmbeddingProvider;
use crate::store::VectorStore;

use super::error::DaemonResult;

const MEMO_TTL: Duration = Duration::from_secs(60);
const MEMO_MAX_SIZE: usize = 100;

struct MemoEntry {
    inserted_at: Instant,
    response: CachedResponse,
}

#[derive(Clone)]
pub enum CachedResponse {
    Semantic(SemanticSearchResponse),
    Hybrid(Vec<HybridResult>),
}

/// FIFO-evicted, TTL-expiring memo keyed by `mode:query:limit:options-digest`.
struct Memo {
    order: Vec<String>,
    entries: HashMap<String, MemoEntry>,
}

impl Memo {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<CachedResponse> {
        self.entries.get(key).and_then(|entry| {
            if entry.inserted_at.elapsed() < MEMO_TTL {
                Some(entry.response.clone())
            } else {
                None
            }
        })
    }

    fn insert(&mut self, key: String, response: CachedResponse) {
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(
            key,
            MemoEntry {
                inserted_at: Instant::now(),
                response,
            },
        );
        while self.order.len() > MEMO_MAX_SIZE {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub fn memo_key(mode: &str, query: &str, limit: usize, options: &SearchOptions) -> String {
    let digest = format!("{:?}:{:?}", options.score_threshold, options.filter);
    format!("{mode}:{query}:{limit}:{digest}")
}

pub struct CacheEntry {
    pub repo_root: PathBuf,
    pub collection: String,
    store: Arc<VectorStore>,
    executor: SearchExecutor,
    hnsw: RwLock<HnswIndexManager>,
    fts: RwLock<Option<FtsIndexManager>>,
    fts_dir: PathBuf,
    memo: RwLock<Memo>,
    /// Serializes `index`/`clean`/`clean_data`; the reader/writer lock
    /// above governs index *handles*, this mutex governs write *ops*.
    write_mutex: Mutex<()>,
    last_accessed: AtomicI64,
    access_count: AtomicU64,
    pub ttl_minutes: u64,
    watching: std::sync::atomic::AtomicBool,
}

impl CacheEntry {
    pub fn new(repo_root: PathBuf, store: Arc<VectorStore>, collection: String, ttl_minutes: u64) -> Self {
        let hnsw_root = repo_root.join(".code-indexer").join("hnsw").join(&collection);
        let fts_dir = repo_root.join(".code-indexer").join("fts");
        let executor = SearchExecutor::new(store.clone(), repo_root.clone());
        Self {
            repo_root,
            collection,
            store,
            executor,
            hnsw: RwLock::new(HnswIndexManager::new(hnsw_root)),
            fts: RwLock::new(fts::try_open(&fts_dir)),
            fts_dir,
            memo: RwLock::new(Memo::new()),
            write_mutex: Mutex::new(()),
            last_accessed: AtomicI64::new(chrono::Utc::now().timestamp()),
            access_count: AtomicU64::new(0),
            ttl_minutes,
            watching: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn touch(&self) {
        self.last_accessed.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_accessed(&self) -> i64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn is_expired(&self) -> bool {
        let idle = chrono::Utc::now().timestamp() - self.last_accessed();
        idle > (self.ttl_minutes as i64) * 60
    }

    pub fn memo_size(&self) -> usize {
        self.memo.read().unwrap().len()
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::Relaxed)
    }

    pub fn set_watching(&self, value: bool) {
        self.watching.store(value, Ordering::Relaxed);
    }

    pub fn hnsw_loaded(&self) -> bool {
        !self.hnsw.read().unwrap().is_stale()
    }

    pub fn fts_loaded(&self) -> bool {
        self.fts.read().unwrap().is_some()
    }

    /// Query path: check the memo under a read lock, release, compute on
    /// miss outside the lock, then briefly reacquire to store.
    pub fn query(
        &self,
        embedder: &dyn EmbeddingProvider,
        query_text: &str,
        options: &SearchOptions,
    ) -> DaemonResult<(SemanticSearchResponse, bool)> {
        self.touch();
        let key = memo_key("query", query_text, options.limit, options);
        if let Some(CachedResponse::Semantic(cached)) = self.memo.read().unwrap().get(&key) {
            let mut response = cached;
            response.timing.cache_hit = true;
            return Ok((response, true));
        }

        let hnsw = self.hnsw.read().unwrap();
        let response = self.executor.search(&self.collection, embedder, &hnsw, query_text, options)?;
        drop(hnsw);

        self.memo
            .write()
            .unwrap()
            .insert(key, CachedResponse::Semantic(response.clone()));
        Ok((response, false))
    }

    pub fn query_fts(&self, query_text: &str, options: &fts::FtsSearchOptions) -> crate::search::FtsSearchResponse {
        self.touch();
        let fts = self.fts.read().unwrap();
        self.executor.search_fts(fts.as_ref(), query_text, options)
    }

    pub fn query_hybrid(
        &self,
        embedder: &dyn EmbeddingProvider,
        query_text: &str,
        options: &SearchOptions,
    ) -> DaemonResult<(Vec<HybridResult>, bool)> {
        self.touch();
        let key = memo_key("hybrid", query_text, options.limit, options);
        if let Some(CachedResponse::Hybrid(cached)) = self.memo.read().unwrap().get(&key) {
            return Ok((cached, true));
        }

        let hnsw = self.hnsw.read().unwrap();
        let fts = self.fts.read().unwrap();
        let results = self.executor.search_hybrid(
            &self.collection,
            embedder,
            &hnsw,
            fts.as_ref(),
            query_text,
            options,
        )?;
        drop(hnsw);
        drop(fts);

        self.memo
            .write()
            .unwrap()
            .insert(key, CachedResponse::Hybrid(results.clone()));
        Ok((results, false))
    }

    /// Serializes through the write mutex; invalidates all cached state
    /// (memo + handles) before returning regardless of the rebuild's
    /// outcome, so a failed rebuild never leaves a stale handle cached.
    pub fn index(&self) -> DaemonResult<usize> {
        let _guard = self.write_mutex.lock().unwrap();
        let hnsw = self.hnsw.read().unwrap();
        let report = hnsw.build(&self.store, &self.collection)?;
        drop(hnsw);
        self.invalidate();
        info!(collection = %self.collection, count = report.vector_count, "daemon-coordinated index rebuild complete");
        Ok(report.vector_count)
    }

    pub fn clean(&self) -> DaemonResult<()> {
        let _guard = self.write_mutex.lock().unwrap();
        self.invalidate();
        Ok(())
    }

    pub fn clean_data(&self) -> DaemonResult<usize> {
        let _guard = self.write_mutex.lock().unwrap();
        let deleted = self.store.delete_by_filter(&self.collection, &crate::payload::Filter::default())?;
        self.invalidate();
        Ok(deleted)
    }

    pub fn mark_index_stale(&self) -> DaemonResult<()> {
        self.hnsw.read().unwrap().mark_stale()?;
        Ok(())
    }

    pub fn clear_cache(&self) {
        self.memo.write().unwrap().clear();
        debug!(collection = %self.collection, "query-result memo cleared");
    }

    fn invalidate(&self) {
        self.memo.write().unwrap().clear();
        *self.hnsw.write().unwrap() = HnswIndexManager::new(
            self.repo_root.join(".code-indexer").join("hnsw").join(&self.collection),
        );
        *self.fts.write().unwrap() = fts::try_open(&self.fts_dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::traits::NullEmbeddingProvider;

    fn entry() -> (tempfile::TempDir, CacheEntry) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(VectorStore::open(dir.path().join("store")));
        store.create_collection("c", 4).unwrap();
        let entry = CacheEntry::new(dir.path().to_path_buf(), store, "c".to_string(), 10);
        (dir, entry)
    }

    #[test]
    fn repeated_query_is_served_from_memo() {
        let (_dir, entry) = entry();
        let embedder = NullEmbeddingProvider { dimension: 4 };
        let options = SearchOptions { limit: 3, ..Default::default() };
        let (_first, hit1) = entry.query(&embedder, "hello", &options).unwrap();
        let (_second, hit2) = entry.query(&embedder, "hello", &options).unwrap();
        assert!(!hit1);
        assert!(hit2);
    }

    #[test]
    fn index_invalidates_memo() {
        let (_dir, entry) = entry();
        let embedder = NullEmbeddingProvider { dimension: 4 };
        let options = SearchOptions { limit: 3, ..Default::default() };
        entry.query(&embedder, "hello", &options).unwrap();
        assert_eq!(entry.memo_size(), 1);
        entry.index().unwrap();
        assert_eq!(entry.memo_size(), 0);
    }

    #[test]
    fn expires_after_ttl_window() {
        let (_dir, entry) = entry();
        entry.last_accessed.store(0, Ordering::Relaxed);
        assert!(entry.is_expired());
    }
}
