//! Batched git status lookup used at *write* time to pick the content
//! storage policy for each chunk (non-git / clean / dirty). One
//! `git ls-tree` and one `git status --porcelain` cover an entire batch, per
//! the ≤500ms/100-files target — never one subprocess per file.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileGitState {
    /// Not tracked by git, or git itself is unavailable.
    NonGit,
    /// Tracked and unmodified; we can recover content from the blob later.
    Clean { blob_hash: String },
    /// Tracked-but-modified, or untracked-but-inside-a-repo.
    Dirty,
}

/// Classify every path in `relative_paths` (relative to `repo_root`) with a
/// single `ls-tree` + single `status` invocation. On any git failure, every
/// path is classified `NonGit` — the store must never refuse to index.
pub fn classify_batch(repo_root: &Path, relative_paths: &[String]) -> HashMap<String, FileGitState> {
    if relative_paths.is_empty() {
        return HashMap::new();
    }

    let tracked = match ls_tree(repo_root, relative_paths) {
        Ok(map) => map,
        Err(err) => {
            warn!(?err, "git ls-tree failed, falling back to non-git policy for batch");
            return relative_paths
                .iter()
                .map(|p| (p.clone(), FileGitState::NonGit))
                .collect();
        }
    };

    let dirty = match status_porcelain(repo_root, relative_paths) {
        Ok(set) => set,
        Err(err) => {
            warn!(?err, "git status failed, treating batch as non-git");
            return relative_paths
                .iter()
                .map(|p| (p.clone(), FileGitState::NonGit))
                .collect();
        }
    };

    relative_paths
        .iter()
        .map(|path| {
            let state = match tracked.get(path) {
                Some(blob_hash) if !dirty.contains(path) => FileGitState::Clean {
                    blob_hash: blob_hash.clone(),
                },
                Some(_) => FileGitState::Dirty,
                None if dirty.contains(path) => FileGitState::Dirty,
                None => FileGitState::NonGit,
            };
            (path.clone(), state)
        })
        .collect()
}

fn git_env(repo_root: &Path) -> Vec<(String, String)> {
    // Handle dubious-ownership by injecting `safe.directory` via env vars
    // rather than touching global git config, so concurrent users of the
    // same machine don't clobber each other's config.
    vec![
        ("GIT_CONFIG_COUNT".into(), "1".into()),
        ("GIT_CONFIG_KEY_0".into(), "safe.directory".into()),
        (
            "GIT_CONFIG_VALUE_0".into(),
            repo_root.to_string_lossy().into_owned(),
        ),
    ]
}

fn ls_tree(repo_root: &Path, paths: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut cmd = Command::new("git");
    cmd.current_dir(repo_root)
        .envs(git_env(repo_root))
        .arg("ls-tree")
        .arg("HEAD")
        .arg("--")
        .args(paths);
    let output = cmd.output()?;
    if !output.status.success() {
        anyhow::bail!(
            "git ls-tree exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut out = HashMap::new();
    for line in stdout.lines() {
        // <mode> SP <type> SP <hash> TAB <path>
        let Some((meta, path)) = line.split_once('\t') else {
            continue;
        };
        let Some(hash) = meta.split_whitespace().nth(2) else {
            continue;
        };
        out.insert(path.to_owned(), hash.to_owned());
    }
    debug!(count = out.len(), "git ls-tree resolved blob hashes");
    Ok(out)
}

fn status_porcelain(repo_root: &Path, paths: &[String]) -> anyhow::Result<std::collections::HashSet<String>> {
    let mut cmd = Command::new("git");
    cmd.current_dir(repo_root)
        .envs(git_env(repo_root))
        .arg("status")
        .arg("--porcelain")
        .arg("--")
        .args(paths);
    let output = cmd.output()?;
    if !output.status.success() {
        anyhow::bail!(
            "git status exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut out = std::collections::HashSet::new();
    for line in stdout.lines() {
        if line.len() < 4 {
            continue;
        }
        let path = line[3..].trim();
        out.insert(path.to_owned());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            Command::new("git")
                .current_dir(dir)
                .args(args)
                .output()
                .expect("git available in test environment")
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
    }

    #[test]
    fn classifies_clean_and_dirty_and_nongit_files() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("clean.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("dirty.py"), "y = 1\n").unwrap();
        Command::new("git")
            .current_dir(dir.path())
            .args(["add", "."])
            .output()
            .unwrap();
        Command::new("git")
            .current_dir(dir.path())
            .args(["commit", "-q", "-m", "init"])
            .output()
            .unwrap();
        std::fs::write(dir.path().join("dirty.py"), "y = 2\n").unwrap();
        std::fs::write(dir.path().join("untracked.py"), "z = 1\n").unwrap();

        let paths = vec![
            "clean.py".to_string(),
            "dirty.py".to_string(),
            "untracked.py".to_string(),
        ];
        let classified = classify_batch(dir.path(), &paths);
        assert!(matches!(
            classified.get("clean.py"),
            Some(FileGitState::Clean { .. })
        ));
        assert_eq!(classified.get("dirty.py"), Some(&FileGitState::Dirty));
        assert_eq!(classified.get("untracked.py"), Some(&FileGitState::Dirty));
    }

    #[test]
    fn non_git_directory_falls_back_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let classified = classify_batch(dir.path(), &["a.py".to_string()]);
        assert_eq!(classified.get("a.py"), Some(&FileGitState::NonGit));
    }
}
