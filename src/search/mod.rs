//! C6: the three single-call search modes the rest of the system is built
//! around. Embeds the query (if semantic), consults the HNSW/FTS indices,
//! resolves chunk content through the git-aware resolver, and scores.

mod error;
pub mod traits;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fts::{FtsIndexManager, FtsSearchOptions};
use crate::hnsw::HnswIndexManager;
use crate::payload::Filter;
use crate::resolver;
use crate::store::{cosine_similarity, VectorStore};

pub use error::{SearchError, SearchResult};
pub use traits::{Chunk, Chunker, EmbeddingError, EmbeddingProvider};

const DEFAULT_OVER_FETCH_FACTOR: usize = 2;
const SEMANTIC_WEIGHT: f32 = 0.6;
const FTS_WEIGHT: f32 = 0.4;

/// `post_result` must be idempotent and monotone (it may only remove
/// results, never add or reorder). The engine itself never constructs
/// one — server-side ACL filtering is an external collaborator's job.
pub type PostResultHook = dyn Fn(Vec<QueryResult>, &SearchContext) -> Vec<QueryResult> + Send + Sync;

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: usize,
    pub score_threshold: Option<f32>,
    pub filter: Option<FilterSpec>,
    pub over_fetch_factor: Option<usize>,
    #[serde(skip)]
    pub post_result: Option<Arc<PostResultHook>>,
}

impl std::fmt::Debug for SearchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOptions")
            .field("limit", &self.limit)
            .field("score_threshold", &self.score_threshold)
            .field("filter", &self.filter)
            .field("over_fetch_factor", &self.over_fetch_factor)
            .field("post_result", &self.post_result.is_some())
            .finish()
    }
}

/// Wire-friendly mirror of [`Filter`]; [`SearchOptions`] carries this
/// instead of `Filter` directly so it can cross the daemon RPC boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSpec(pub Vec<(String, String)>);

impl FilterSpec {
    pub fn to_filter(&self) -> Filter {
        use crate::payload::{FilterCondition, FilterOp};
        Filter(
            self.0
                .iter()
                .map(|(field, value)| FilterCondition {
                    field: field.clone(),
                    op: FilterOp::Equals(value.clone()),
                })
                .collect(),
        )
    }
}

pub struct SearchContext {
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    pub path: Option<String>,
    pub content: String,
    pub score: f32,
    pub is_stale: bool,
    pub staleness_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Timing {
    pub hnsw_search_ms: u64,
    pub vector_search_ms: u64,
    pub total_ms: u64,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticSearchResponse {
    pub results: Vec<QueryResult>,
    pub timing: Timing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsSearchResponse {
    pub results: Vec<QueryResult>,
    pub error: Option<String>,
    pub query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultSource {
    Semantic,
    Fts,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridResult {
    pub path: String,
    pub content: String,
    pub combined_score: f32,
    pub source: ResultSource,
}

pub struct SearchExecutor {
    store: Arc<VectorStore>,
    repo_root: std::path::PathBuf,
}

impl SearchExecutor {
    pub fn new(store: Arc<VectorStore>, repo_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            store,
            repo_root: repo_root.into(),
        }
    }

    /// Semantic search: embed, `ensure_fresh`, HNSW over-fetch, resolve,
    /// filter, score, threshold, truncate. Embedding happens before any
    /// index lock is touched.
    pub fn search(
        &self,
        collection: &str,
        embedder: &dyn EmbeddingProvider,
        hnsw: &HnswIndexManager,
        query_text: &str,
        options: &SearchOptions,
    ) -> SearchResult<SemanticSearchResponse> {
        let total_started = Instant::now();
        let query_vec = embedder.embed(query_text)?;

        let hnsw_started = Instant::now();
        let handle = hnsw.ensure_fresh(&self.store, collection)?;
        let over_fetch = options.over_fetch_factor.unwrap_or(DEFAULT_OVER_FETCH_FACTOR).max(1);
        let fetch_k = options.limit.max(1) * over_fetch;
        let candidates = handle.search(&query_vec, fetch_k);
        let hnsw_search_ms = hnsw_started.elapsed().as_millis() as u64;

        let vector_started = Instant::now();
        let filter = options.filter.as_ref().map(FilterSpec::to_filter);
        let mut results = Vec::new();
        for (id, _distance) in candidates {
            let Some(record) = self.store.get_point(collection, &id)? else {
                continue;
            };
            if let Some(filter) = &filter {
                if !filter.matches(&record.payload) {
                    continue;
                }
            }
            let resolved = resolver::resolve_one(&self.repo_root, &record);
            let score = cosine_similarity(&query_vec, &record.vector);
            if let Some(threshold) = options.score_threshold {
                if score < threshold {
                    continue;
                }
            }
            results.push(QueryResult {
                id: record.id,
                path: record.payload.path().map(str::to_owned),
                content: resolved.content,
                score,
                is_stale: resolved.staleness.is_stale,
                staleness_reason: resolved.staleness.reason,
            });
        }
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(options.limit.max(1));
        let vector_search_ms = vector_started.elapsed().as_millis() as u64;

        let context = SearchContext {
            collection: collection.to_owned(),
        };
        if let Some(hook) = &options.post_result {
            results = hook(results, &context);
        }

        let timing = Timing {
            hnsw_search_ms,
            vector_search_ms,
            total_ms: total_started.elapsed().as_millis() as u64,
            cache_hit: false,
        };
        debug!(collection, results = results.len(), ?timing, "semantic search complete");
        Ok(SemanticSearchResponse { results, timing })
    }

    /// Full-text search. FTS being unavailable is not an error at this
    /// layer — an empty-result response with `error` set is the contract.
    pub fn search_fts(
        &self,
        fts: Option<&FtsIndexManager>,
        query_text: &str,
        options: &FtsSearchOptions,
    ) -> FtsSearchResponse {
        let Some(fts) = fts else {
            return FtsSearchResponse {
                results: Vec::new(),
                error: Some("FTS unavailable".to_owned()),
                query: query_text.to_owned(),
            };
        };
        match fts.search(query_text, options) {
            Ok(hits) => FtsSearchResponse {
                results: hits
                    .into_iter()
                    .map(|hit| QueryResult {
                        id: hit.path.clone(),
                        path: Some(hit.path),
                        content: hit.snippet,
                        score: hit.score,
                        is_stale: false,
                        staleness_reason: None,
                    })
                    .collect(),
                error: None,
                query: query_text.to_owned(),
            },
            Err(err) => FtsSearchResponse {
                results: Vec::new(),
                error: Some(err.to_string()),
                query: query_text.to_owned(),
            },
        }
    }

    /// Hybrid search: runs semantic and FTS on two joined OS threads (no
    /// async runtime needed — both legs are CPU/IO-blocking), normalizes
    /// each score stream into `[0, 1]`, and merges by path with fixed
    /// 0.6/0.4 weights.
    pub fn search_hybrid(
        &self,
        collection: &str,
        embedder: &dyn EmbeddingProvider,
        hnsw: &HnswIndexManager,
        fts: Option<&FtsIndexManager>,
        query_text: &str,
        options: &SearchOptions,
    ) -> SearchResult<Vec<HybridResult>> {
        let lexical_options = FtsSearchOptions {
            limit: options.limit.max(1) * 2,
            ..Default::default()
        };
        let (semantic, lexical) = std::thread::scope(|scope| {
            let fts_handle = scope.spawn(|| self.search_fts(fts, query_text, &lexical_options));
            let semantic = self.search(collection, embedder, hnsw, query_text, options);
            let lexical = fts_handle.join().expect("fts search thread panicked");
            (semantic, lexical)
        });
        let semantic = semantic?;

        let semantic_norm = normalize_scores(semantic.results.iter().map(|r| r.score));
        let lexical_norm = normalize_scores(lexical.results.iter().map(|r| r.score));

        use std::collections::HashMap;
        let mut by_path: HashMap<String, HybridResult> = HashMap::new();

        for (result, norm) in semantic.results.iter().zip(semantic_norm) {
            let Some(path) = &result.path else { continue };
            by_path.insert(
                path.clone(),
                HybridResult {
                    path: path.clone(),
                    content: result.content.clone(),
                    combined_score: SEMANTIC_WEIGHT * norm,
                    source: ResultSource::Semantic,
                },
            );
        }
        for (result, norm) in lexical.results.iter().zip(lexical_norm) {
            let Some(path) = &result.path else { continue };
            match by_path.get_mut(path) {
                Some(existing) => {
                    existing.combined_score += FTS_WEIGHT * norm;
                    existing.source = ResultSource::Both;
                }
                None => {
                    by_path.insert(
                        path.clone(),
                        HybridResult {
                            path: path.clone(),
                            content: result.content.clone(),
                            combined_score: FTS_WEIGHT * norm,
                            source: ResultSource::Fts,
                        },
                    );
                }
            }
        }

        let mut merged: Vec<HybridResult> = by_path.into_values().collect();
        merged.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(options.limit.max(1));
        Ok(merged)
    }
}

fn normalize_scores(scores: impl Iterator<Item = f32> + Clone) -> Vec<f32> {
    let max = scores.clone().fold(f32::MIN, f32::max);
    let min = scores.clone().fold(f32::MAX, f32::min);
    if !max.is_finite() || !min.is_finite() || (max - min).abs() < f32::EPSILON {
        return scores.map(|_| 1.0).collect();
    }
    scores.map(|s| (s - min) / (max - min)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use crate::record::Record;
    use crate::search::traits::EmbeddingProvider;

    struct IdentityEmbedder;
    impl EmbeddingProvider for IdentityEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }
        fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }
    }

    fn setup() -> (tempfile::TempDir, SearchExecutor, HnswIndexManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(VectorStore::open(dir.path().join("store")));
        store.create_collection("c", 4).unwrap();
        let mut payload = Payload::new();
        payload.insert("path", "x.py");
        payload.insert("chunk_text", "def a(): pass");
        let record = Record::new("a", vec![1.0, 0.0, 0.0, 0.0], payload);
        store.upsert_points("c", None, vec![record], None).unwrap();

        let hnsw = HnswIndexManager::new(dir.path().join("hnsw").join("c"));
        let executor = SearchExecutor::new(store, dir.path());
        (dir, executor, hnsw)
    }

    #[test]
    fn semantic_search_returns_resolved_content() {
        let (_dir, executor, hnsw) = setup();
        let options = SearchOptions {
            limit: 5,
            ..Default::default()
        };
        let response = executor
            .search("c", &IdentityEmbedder, &hnsw, "anything", &options)
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].content, "def a(): pass");
        assert!((response.results[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn score_threshold_drops_low_scoring_results() {
        let (_dir, executor, hnsw) = setup();
        let options = SearchOptions {
            limit: 5,
            score_threshold: Some(1.5),
            ..Default::default()
        };
        let response = executor
            .search("c", &IdentityEmbedder, &hnsw, "anything", &options)
            .unwrap();
        assert!(response.results.is_empty());
    }

    #[test]
    fn fts_unavailable_returns_error_field_not_err() {
        let (_dir, executor, _hnsw) = setup();
        let options = crate::fts::FtsSearchOptions {
            limit: 5,
            ..Default::default()
        };
        let response = executor.search_fts(None, "query", &options);
        assert!(response.results.is_empty());
        assert!(response.error.is_some());
    }
}
