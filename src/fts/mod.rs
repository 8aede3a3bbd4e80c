//! C5: a read-only handle onto an externally-built lexical index. Building
//! the index is out of scope here — this manager only ever opens what's
//! already on disk, and treats a missing or empty index directory as
//! "FTS unavailable" rather than an error callers must special-case.

mod schema;
mod tokenizer;

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, Query, QueryParser, RegexQuery};
use tantivy::schema::Value;
use tantivy::{Index, IndexReader, ReloadPolicy, Term};
use thiserror::Error;
use tracing::{debug, warn};

pub use schema::CodeSnippetSchema;

#[derive(Debug, Error)]
pub enum FtsError {
    #[error("FTS index unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Tantivy(#[from] tantivy::TantivyError),
    #[error(transparent)]
    QueryParse(#[from] tantivy::query::QueryParserError),
}

pub type FtsResult<T> = Result<T, FtsError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalHit {
    pub path: String,
    pub language: Option<String>,
    pub snippet: String,
    pub line_start: Option<u64>,
    pub line_end: Option<u64>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsSearchOptions {
    pub limit: usize,
    pub max_snippet_lines: usize,
    pub language_filter: Option<String>,
    pub path_include: Option<String>,
    pub path_exclude: Option<String>,
    /// Post-filters hits to those where `query_text`, in its original
    /// case, appears literally in the matched content — matching still
    /// happens through the (case-folding) tokenizer, this only narrows
    /// the result set afterward.
    pub case_sensitive: bool,
    /// When set, matches terms within this Damerau-Levenshtein edit
    /// distance instead of requiring an exact tokenized match. Ignored
    /// when `regex_mode` is set.
    pub edit_distance: Option<u8>,
    /// Treats `query_text` as a regular expression matched against the
    /// content and path fields directly, bypassing the query parser.
    pub regex_mode: bool,
}

impl Default for FtsSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            max_snippet_lines: 10,
            language_filter: None,
            path_include: None,
            path_exclude: None,
            case_sensitive: false,
            edit_distance: None,
            regex_mode: false,
        }
    }
}

/// A read-only lexical searcher. Held by the search executor directly, or
/// by the daemon's cache entry behind a read/write lock.
pub struct FtsIndexManager {
    index: Index,
    schema: CodeSnippetSchema,
    reader: RwLock<IndexReader>,
}

impl FtsIndexManager {
    /// `open` never builds an index; a missing/corrupt directory yields
    /// `FtsError::Unavailable` rather than creating one.
    pub fn open(index_dir: &Path) -> FtsResult<Self> {
        if !index_dir.exists() || is_empty_dir(index_dir) {
            return Err(FtsError::Unavailable(format!(
                "{} does not exist or is empty",
                index_dir.display()
            )));
        }
        let schema = CodeSnippetSchema::build();
        let mmap_dir = tantivy::directory::MmapDirectory::open(index_dir)
            .map_err(|e| FtsError::Unavailable(e.to_string()))?;
        let index = Index::open_or_create(mmap_dir, schema.schema.clone())
            .map_err(|e| FtsError::Unavailable(e.to_string()))?;
        index
            .tokenizers()
            .register(schema::CODE_TOKENIZER, tantivy::tokenizer::TextAnalyzer::from(
                tokenizer::CodeSnippetTokenizer,
            ));
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        debug!(dir = %index_dir.display(), "opened FTS index");
        Ok(Self {
            index,
            schema,
            reader: RwLock::new(reader),
        })
    }

    /// Builds a boolean/phrase query via tantivy's parser by default;
    /// `regex_mode` and `edit_distance` each swap in a different query
    /// type instead, per [`FtsSearchOptions`].
    fn build_query(&self, query_text: &str, options: &FtsSearchOptions) -> FtsResult<Box<dyn Query>> {
        if options.regex_mode {
            let content = RegexQuery::from_pattern(query_text, self.schema.content)?;
            let path = RegexQuery::from_pattern(query_text, self.schema.path)?;
            return Ok(Box::new(BooleanQuery::new(vec![
                (Occur::Should, Box::new(content) as Box<dyn Query>),
                (Occur::Should, Box::new(path) as Box<dyn Query>),
            ])));
        }

        if let Some(distance) = options.edit_distance {
            let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
            for word in query_text.split_whitespace() {
                let normalized = word.to_lowercase();
                for field in [self.schema.content, self.schema.path] {
                    let term = Term::from_field_text(field, &normalized);
                    let fuzzy = FuzzyTermQuery::new(term, distance, true);
                    clauses.push((Occur::Should, Box::new(fuzzy)));
                }
            }
            if clauses.is_empty() {
                return Err(FtsError::Unavailable("fuzzy query has no terms".to_owned()));
            }
            return Ok(Box::new(BooleanQuery::new(clauses)));
        }

        let parser = QueryParser::for_index(&self.index, vec![self.schema.content, self.schema.path]);
        Ok(parser.parse_query(query_text)?)
    }

    pub fn search(&self, query_text: &str, options: &FtsSearchOptions) -> FtsResult<Vec<LexicalHit>> {
        let reader = self.reader.read().unwrap();
        let searcher = reader.searcher();
        let query = self.build_query(query_text, options)?;

        let fetch_limit = options.limit.max(1) * 3;
        let top_docs = searcher.search(query.as_ref(), &TopDocs::with_limit(fetch_limit))?;

        let mut hits = Vec::new();
        for (score, addr) in top_docs {
            let doc = searcher.doc(addr)?;
            let path = doc
                .get_first(self.schema.path)
                .and_then(|v| v.as_text())
                .unwrap_or_default()
                .to_owned();
            let language = doc
                .get_first(self.schema.language)
                .and_then(|v| v.as_text())
                .map(str::to_owned);

            if let Some(filter) = &options.language_filter {
                if language.as_deref() != Some(filter.as_str()) {
                    continue;
                }
            }
            if let Some(include) = &options.path_include {
                if !path.contains(include.as_str()) {
                    continue;
                }
            }
            if let Some(exclude) = &options.path_exclude {
                if path.contains(exclude.as_str()) {
                    continue;
                }
            }

            let content = doc
                .get_first(self.schema.content)
                .and_then(|v| v.as_text())
                .unwrap_or_default();
            if options.case_sensitive && !content.contains(query_text) {
                continue;
            }
            let snippet = content
                .lines()
                .take(options.max_snippet_lines)
                .collect::<Vec<_>>()
                .join("\n");
            let line_start = doc.get_first(self.schema.line_start).and_then(|v| v.as_u64());
            let line_end = doc.get_first(self.schema.line_end).and_then(|v| v.as_u64());

            hits.push(LexicalHit {
                path,
                language,
                snippet,
                line_start,
                line_end,
                score,
            });
            if hits.len() >= options.limit {
                break;
            }
        }
        Ok(hits)
    }

    pub fn index_path(&self) -> Option<PathBuf> {
        None
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

/// Best-effort open: logs and returns `None` instead of propagating, for
/// call sites (the daemon, the search executor) that treat "no FTS" as a
/// normal degraded mode rather than a hard error.
pub fn try_open(index_dir: &Path) -> Option<FtsIndexManager> {
    match FtsIndexManager::open(index_dir) {
        Ok(manager) => Some(manager),
        Err(err) => {
            warn!(?err, dir = %index_dir.display(), "FTS unavailable for this project");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tantivy::doc;

    fn build_test_index(dir: &Path) -> CodeSnippetSchema {
        let schema = CodeSnippetSchema::build();
        let mmap_dir = tantivy::directory::MmapDirectory::open(dir).unwrap();
        let index = Index::open_or_create(mmap_dir, schema.schema.clone()).unwrap();
        index.tokenizers().register(
            schema::CODE_TOKENIZER,
            tantivy::tokenizer::TextAnalyzer::from(tokenizer::CodeSnippetTokenizer),
        );
        let mut writer = index.writer(15_000_000).unwrap();
        writer
            .add_document(doc!(
                schema.path => "src/foo.py",
                schema.language => "python",
                schema.content => "def read_file(path): return open(path).read()",
                schema.line_start => 1u64,
                schema.line_end => 1u64,
            ))
            .unwrap();
        writer.commit().unwrap();
        schema
    }

    #[test]
    fn missing_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = FtsIndexManager::open(&missing).unwrap_err();
        assert!(matches!(err, FtsError::Unavailable(_)));
    }

    #[test]
    fn empty_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = FtsIndexManager::open(dir.path()).unwrap_err();
        assert!(matches!(err, FtsError::Unavailable(_)));
    }

    #[test]
    fn search_finds_snake_case_identifier() {
        let dir = tempfile::tempdir().unwrap();
        build_test_index(dir.path());
        let manager = FtsIndexManager::open(dir.path()).unwrap();
        let hits = manager.search("read_file", &FtsSearchOptions::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "src/foo.py");
    }

    #[test]
    fn language_filter_excludes_non_matching_docs() {
        let dir = tempfile::tempdir().unwrap();
        build_test_index(dir.path());
        let manager = FtsIndexManager::open(dir.path()).unwrap();
        let mut options = FtsSearchOptions::default();
        options.language_filter = Some("rust".to_string());
        let hits = manager.search("read_file", &options).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn fuzzy_edit_distance_matches_a_misspelled_term() {
        let dir = tempfile::tempdir().unwrap();
        build_test_index(dir.path());
        let manager = FtsIndexManager::open(dir.path()).unwrap();
        let mut options = FtsSearchOptions::default();
        options.edit_distance = Some(1);
        let hits = manager.search("raed_file", &options).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "src/foo.py");
    }

    #[test]
    fn regex_mode_matches_a_path_pattern() {
        let dir = tempfile::tempdir().unwrap();
        build_test_index(dir.path());
        let manager = FtsIndexManager::open(dir.path()).unwrap();
        let mut options = FtsSearchOptions::default();
        options.regex_mode = true;
        let hits = manager.search("src/.*\\.py", &options).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "src/foo.py");
    }

    #[test]
    fn case_sensitive_rejects_mismatched_case() {
        let dir = tempfile::tempdir().unwrap();
        build_test_index(dir.path());
        let manager = FtsIndexManager::open(dir.path()).unwrap();
        let mut options = FtsSearchOptions::default();
        options.case_sensitive = true;
        let hits = manager.search("READ_FILE", &options).unwrap();
        assert!(hits.is_empty());
    }
}
