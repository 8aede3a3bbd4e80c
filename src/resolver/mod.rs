//! C3: reconstructs chunk text at query time and classifies a record's
//! staleness relative to the file it was indexed from — fresh, modified, or
//! deleted. Never fabricates content: a recorded blob that's vanished from
//! the repository (history rewrite) comes back empty, with an explicit
//! staleness reason.

mod error;
mod git_blob;

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::record::Record;

pub use error::{ResolverError, ResolverResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StalenessIndicator {
    Fresh,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staleness {
    pub is_stale: bool,
    pub indicator: StalenessIndicator,
    pub reason: Option<&'static str>,
    pub hash_mismatch: bool,
}

impl Staleness {
    fn fresh() -> Self {
        Self {
            is_stale: false,
            indicator: StalenessIndicator::Fresh,
            reason: None,
            hash_mismatch: false,
        }
    }

    fn modified() -> Self {
        Self {
            is_stale: true,
            indicator: StalenessIndicator::Modified,
            reason: Some("file_modified_after_indexing"),
            hash_mismatch: true,
        }
    }

    fn deleted() -> Self {
        Self {
            is_stale: true,
            indicator: StalenessIndicator::Deleted,
            reason: Some("file_deleted"),
            hash_mismatch: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedChunk {
    pub content: String,
    pub staleness: Staleness,
}

/// Resolve a single record's chunk text and staleness against the
/// repository on disk at `repo_root`. For resolving many records at once,
/// prefer [`resolve_batch`], which pipelines the git subprocess calls.
pub fn resolve_one(repo_root: &Path, record: &Record) -> ResolvedChunk {
    resolve_batch(repo_root, std::slice::from_ref(record))
        .into_iter()
        .next()
        .unwrap_or_else(|| ResolvedChunk {
            content: String::new(),
            staleness: Staleness::fresh(),
        })
}

/// Batched resolution: at most one `git cat-file --batch` and one
/// `git hash-object --stdin-paths` invocation for the whole slice, never
/// one subprocess per record.
pub fn resolve_batch(repo_root: &Path, records: &[Record]) -> Vec<ResolvedChunk> {
    // Partition by which records even need git: records already carrying
    // `chunk_text` only need a hash re-check when they were indexed dirty.
    let needs_disk_hash: Vec<&Record> = records
        .iter()
        .filter(|r| r.payload.chunk_text().is_none() || r.payload.indexed_with_uncommitted_changes())
        .filter(|r| r.payload.path().is_some())
        .collect();

    let paths: Vec<String> = needs_disk_hash
        .iter()
        .filter_map(|r| r.payload.path().map(str::to_owned))
        .collect();
    let current_hashes = git_blob::hash_object_batch(repo_root, &paths);

    let blob_hashes_needed: Vec<String> = records
        .iter()
        .filter(|r| r.payload.chunk_text().is_none())
        .filter_map(|r| r.payload.git_blob_hash().map(str::to_owned))
        .collect();
    let blob_contents = git_blob::cat_file_batch(repo_root, &blob_hashes_needed);

    records
        .iter()
        .map(|record| resolve_with_context(repo_root, record, &current_hashes, &blob_contents))
        .collect()
}

fn resolve_with_context(
    repo_root: &Path,
    record: &Record,
    current_hashes: &HashMap<String, String>,
    blob_contents: &HashMap<String, Vec<u8>>,
) -> ResolvedChunk {
    if let Some(chunk_text) = record.payload.chunk_text() {
        let staleness = if record.payload.indexed_with_uncommitted_changes() {
            // Dirty records never carry a `git_blob_hash` (there's no commit
            // to point at yet), so with nothing recorded to compare against
            // there's nothing that can mismatch: treat as fresh.
            let still_matches = match record.payload.git_blob_hash() {
                None => true,
                Some(recorded) => record
                    .payload
                    .path()
                    .and_then(|p| current_hashes.get(p))
                    .map(|current| current.as_str() == recorded)
                    .unwrap_or(true),
            };
            if still_matches {
                Staleness::fresh()
            } else {
                Staleness::modified()
            }
        } else {
            Staleness::fresh()
        };
        return ResolvedChunk {
            content: chunk_text.to_owned(),
            staleness,
        };
    }

    let Some(path) = record.payload.path() else {
        return ResolvedChunk {
            content: String::new(),
            staleness: Staleness::fresh(),
        };
    };
    let full_path = repo_root.join(path);

    if !full_path.exists() {
        let content = record
            .payload
            .git_blob_hash()
            .and_then(|hash| blob_contents.get(hash))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();
        return ResolvedChunk {
            content,
            staleness: Staleness::deleted(),
        };
    }

    let current_hash = current_hashes.get(path).cloned();
    let matches_recorded = match (&current_hash, record.payload.git_blob_hash()) {
        (Some(current), Some(recorded)) => current == recorded,
        // No recorded hash to compare against: treat as fresh.
        (_, None) => true,
        (None, Some(_)) => false,
    };

    if matches_recorded {
        let content = read_lines(&full_path, record.payload.line_start(), record.payload.line_end())
            .unwrap_or_default();
        ResolvedChunk {
            content,
            staleness: Staleness::fresh(),
        }
    } else {
        let content = record
            .payload
            .git_blob_hash()
            .and_then(|hash| blob_contents.get(hash))
            .map(|bytes| {
                extract_lines(
                    &String::from_utf8_lossy(bytes),
                    record.payload.line_start(),
                    record.payload.line_end(),
                )
            })
            .unwrap_or_default();
        ResolvedChunk {
            content,
            staleness: Staleness::modified(),
        }
    }
}

fn read_lines(path: &Path, start: Option<i64>, end: Option<i64>) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    Some(extract_lines(&text, start, end))
}

fn extract_lines(text: &str, start: Option<i64>, end: Option<i64>) -> String {
    match (start, end) {
        (Some(start), Some(end)) if start >= 1 && end >= start => {
            let start = start as usize;
            let end = end as usize;
            text.lines()
                .skip(start - 1)
                .take(end - start + 1)
                .collect::<Vec<_>>()
                .join("\n")
        }
        _ => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            Command::new("git")
                .current_dir(dir)
                .args(args)
                .output()
                .unwrap()
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "t@example.com"]);
        run(&["config", "user.name", "t"]);
    }

    fn commit_all(dir: &Path) {
        Command::new("git").current_dir(dir).args(["add", "."]).output().unwrap();
        Command::new("git")
            .current_dir(dir)
            .args(["commit", "-q", "-m", "c"])
            .output()
            .unwrap();
    }

    fn blob_hash_of(dir: &Path, file: &str) -> String {
        let output = Command::new("git")
            .current_dir(dir)
            .args(["hash-object", file])
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout).trim().to_owned()
    }

    #[test]
    fn clean_record_without_modification_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("foo.py"), "def foo(): return 42\n").unwrap();
        commit_all(dir.path());
        let hash = blob_hash_of(dir.path(), "foo.py");

        let mut payload = Payload::new();
        payload.insert("path", "foo.py");
        payload.insert("line_start", 1i64);
        payload.insert("line_end", 1i64);
        payload.insert("language", "python");
        payload.insert("type", "content");
        payload.insert("git_blob_hash", hash);
        payload.insert("indexed_with_uncommitted_changes", false);
        let record = Record::new("a", vec![0.0], payload);

        let resolved = resolve_one(dir.path(), &record);
        assert!(!resolved.staleness.is_stale);
        assert_eq!(resolved.content, "def foo(): return 42\n");
    }

    #[test]
    fn modified_file_resolves_from_blob_and_flags_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("foo.py"), "def foo(): return 42\n").unwrap();
        commit_all(dir.path());
        let hash = blob_hash_of(dir.path(), "foo.py");
        std::fs::write(dir.path().join("foo.py"), "def foo(): return 99\n").unwrap();

        let mut payload = Payload::new();
        payload.insert("path", "foo.py");
        payload.insert("line_start", 1i64);
        payload.insert("line_end", 1i64);
        payload.insert("language", "python");
        payload.insert("type", "content");
        payload.insert("git_blob_hash", hash);
        payload.insert("indexed_with_uncommitted_changes", false);
        let record = Record::new("a", vec![0.0], payload);

        let resolved = resolve_one(dir.path(), &record);
        assert!(resolved.staleness.is_stale);
        assert_eq!(
            resolved.staleness.reason,
            Some("file_modified_after_indexing")
        );
        assert!(resolved.staleness.hash_mismatch);
        assert_eq!(resolved.content, "def foo(): return 42\n");
    }

    #[test]
    fn deleted_file_resolves_from_blob_and_flags_deleted() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("foo.py"), "def foo(): return 42\n").unwrap();
        commit_all(dir.path());
        let hash = blob_hash_of(dir.path(), "foo.py");
        std::fs::remove_file(dir.path().join("foo.py")).unwrap();

        let mut payload = Payload::new();
        payload.insert("path", "foo.py");
        payload.insert("line_start", 1i64);
        payload.insert("line_end", 1i64);
        payload.insert("language", "python");
        payload.insert("type", "content");
        payload.insert("git_blob_hash", hash);
        let record = Record::new("a", vec![0.0], payload);

        let resolved = resolve_one(dir.path(), &record);
        assert!(resolved.staleness.is_stale);
        assert_eq!(resolved.staleness.reason, Some("file_deleted"));
        assert!(!resolved.content.is_empty());
    }

    #[test]
    fn non_git_record_with_chunk_text_is_always_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut payload = Payload::new();
        payload.insert("path", "x.py");
        payload.insert("chunk_text", "def a(): pass");
        let record = Record::new("a", vec![0.0], payload);
        let resolved = resolve_one(dir.path(), &record);
        assert!(!resolved.staleness.is_stale);
        assert_eq!(resolved.content, "def a(): pass");
    }

    #[test]
    fn dirty_record_with_no_recorded_hash_is_fresh_in_a_real_repo() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("foo.py"), "def foo(): return 42\n").unwrap();
        commit_all(dir.path());

        // Uncommitted-changes records never carry a git_blob_hash (there's
        // no commit to point at), so `git hash-object` succeeding on the
        // unchanged file must not be read as a mismatch.
        let mut payload = Payload::new();
        payload.insert("path", "foo.py");
        payload.insert("chunk_text", "def foo(): return 42\n");
        payload.insert("indexed_with_uncommitted_changes", true);
        let record = Record::new("a", vec![0.0], payload);

        let resolved = resolve_one(dir.path(), &record);
        assert!(!resolved.staleness.is_stale);
        assert_eq!(resolved.content, "def foo(): return 42\n");
    }
}
