//! Commit-frequency and last-commit-timestamp lookups used to populate the
//! FTS schema's ride-along ranking fields (`last_commit_unix_seconds`,
//! `commit_frequency`). Unlike the chunk resolver (which shells out to `git`
//! because it runs off the synchronous store path with no batching story for
//! single-file history walks), this lives on its own and can afford to open
//! the repository once with `gix` and walk history in-process.

use std::path::Path;

use gix::bstr::ByteSlice;
use gix::objs::tree::EntryMode;

/// How far back to walk first-parent history before giving up. Repos with
/// deep history on a hot path file would otherwise make this unbounded.
const MAX_COMMITS_WALKED: usize = 500;

#[derive(Debug, Clone, Copy, Default)]
pub struct FileCommitMetadata {
    pub last_commit_unix_seconds: Option<i64>,
    pub commit_frequency: u64,
}

/// Best-effort: any gix error (not a repo, shallow clone missing objects,
/// unborn HEAD) collapses to the zero value rather than propagating, since
/// this only feeds a ranking signal, not indexing correctness.
pub fn file_commit_metadata(repo_root: &Path, file_path: &str) -> FileCommitMetadata {
    match collect(repo_root, file_path) {
        Ok(meta) => meta,
        Err(err) => {
            tracing::debug!(path = file_path, error = %err, "git commit metadata unavailable");
            FileCommitMetadata::default()
        }
    }
}

fn collect(repo_root: &Path, file_path: &str) -> anyhow::Result<FileCommitMetadata> {
    let repo = gix::open(repo_root)?;
    let mut commit = repo.head_id()?.object()?.into_commit();
    let mut parent = commit.parent_ids().next();

    let mut last_commit_unix_seconds = None;
    let mut commit_frequency = 0u64;

    for _ in 0..MAX_COMMITS_WALKED {
        let touches_file = match parent {
            Some(parent_id) => {
                let parent_commit = parent_id.object()?.into_commit();
                commit_touches_path(&commit, &parent_commit, file_path)?
            }
            // Root commit: everything in its tree was "added" by it.
            None => true,
        };

        if touches_file {
            commit_frequency += 1;
            if last_commit_unix_seconds.is_none() {
                last_commit_unix_seconds = Some(commit.time()?.seconds);
            }
        }

        let Some(parent_id) = parent else {
            break;
        };
        let parent_commit = parent_id.object()?.into_commit();
        parent = parent_commit.parent_ids().next();
        commit = parent_commit;
    }

    Ok(FileCommitMetadata {
        last_commit_unix_seconds,
        commit_frequency,
    })
}

/// `for_each_to_obtain_tree` requires a user error type implementing
/// `std::error::Error`; the closure below never fails, so this is never
/// actually constructed.
#[derive(Debug)]
struct Unreachable;

impl std::fmt::Display for Unreachable {
    fn fmt(&self, _: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        unreachable!("path-matching diff walk does not fail")
    }
}

impl std::error::Error for Unreachable {}

fn commit_touches_path(
    commit: &gix::Commit<'_>,
    parent: &gix::Commit<'_>,
    file_path: &str,
) -> anyhow::Result<bool> {
    let mut touched = false;
    commit
        .tree()?
        .changes()?
        .track_path()
        .for_each_to_obtain_tree(&parent.tree()?, |change| {
            let location = change.location.to_str_lossy();
            if location == file_path {
                let is_blob_change = match &change.event {
                    gix::object::tree::diff::change::Event::Addition { entry_mode, .. }
                    | gix::object::tree::diff::change::Event::Deletion { entry_mode, .. }
                    | gix::object::tree::diff::change::Event::Modification { entry_mode, .. } => {
                        matches!(entry_mode, EntryMode::Blob)
                    }
                    gix::object::tree::diff::change::Event::Rewrite { entry_mode, .. } => {
                        matches!(entry_mode, EntryMode::Blob)
                    }
                };
                if is_blob_change {
                    touched = true;
                }
            }
            Ok::<gix::object::tree::diff::Action, Unreachable>(
                gix::object::tree::diff::Action::Continue,
            )
        })
        .map_err(|err| anyhow::anyhow!("tree diff failed: {err:?}"))?;
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn run(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .expect("git subprocess");
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn walks_history_for_a_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        run(dir, &["init", "-q"]);
        run(dir, &["config", "user.email", "a@example.com"]);
        run(dir, &["config", "user.name", "a"]);

        std::fs::write(dir.join("a.rs"), "fn a() {}\n").unwrap();
        run(dir, &["add", "a.rs"]);
        run(dir, &["commit", "-q", "-m", "add a"]);

        std::fs::write(dir.join("b.rs"), "fn b() {}\n").unwrap();
        run(dir, &["add", "b.rs"]);
        run(dir, &["commit", "-q", "-m", "add b"]);

        std::fs::write(dir.join("a.rs"), "fn a() { 1 }\n").unwrap();
        run(dir, &["add", "a.rs"]);
        run(dir, &["commit", "-q", "-m", "touch a again"]);

        let meta = file_commit_metadata(dir, "a.rs");
        assert_eq!(meta.commit_frequency, 2);
        assert!(meta.last_commit_unix_seconds.is_some());

        let meta_b = file_commit_metadata(dir, "b.rs");
        assert_eq!(meta_b.commit_frequency, 1);
    }

    #[test]
    fn unknown_repo_root_collapses_to_default() {
        let meta = file_commit_metadata(Path::new("/nonexistent/not-a-repo"), "x.rs");
        assert_eq!(meta.commit_frequency, 0);
        assert!(meta.last_commit_unix_seconds.is_none());
    }
}
