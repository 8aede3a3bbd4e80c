//! Batched wrappers around `git cat-file --batch` and
//! `git hash-object --stdin-paths`, each a single subprocess per call no
//! matter how many paths/hashes are requested. Every invocation is bounded
//! by a hard timeout so a wedged repository can't hang a search request.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::warn;

use super::error::{ResolverError, ResolverResult};

const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(5);

fn git_env(repo_root: &Path) -> Vec<(String, String)> {
    vec![
        ("GIT_CONFIG_COUNT".into(), "1".into()),
        ("GIT_CONFIG_KEY_0".into(), "safe.directory".into()),
        (
            "GIT_CONFIG_VALUE_0".into(),
            repo_root.to_string_lossy().into_owned(),
        ),
    ]
}

/// Feed `paths` to `git hash-object --stdin-paths` and return the
/// `path -> blob hash` map for every path git could hash. Paths it can't
/// (deleted, outside the repo) are simply absent from the result.
pub fn hash_object_batch(repo_root: &Path, paths: &[String]) -> HashMap<String, String> {
    if paths.is_empty() {
        return HashMap::new();
    }
    let existing: Vec<&String> = paths
        .iter()
        .filter(|p| repo_root.join(p).exists())
        .collect();
    if existing.is_empty() {
        return HashMap::new();
    }

    let result = run_with_stdin(
        repo_root,
        &["hash-object", "--stdin-paths"],
        existing
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    );
    let stdout = match result {
        Ok(stdout) => stdout,
        Err(err) => {
            warn!(?err, "git hash-object batch failed");
            return HashMap::new();
        }
    };

    existing
        .into_iter()
        .zip(stdout.lines())
        .map(|(path, hash)| (path.clone(), hash.trim().to_owned()))
        .collect()
}

/// Feed `hashes` to `git cat-file --batch` and return each blob's raw
/// content, keyed by hash. Missing/unreadable blobs are absent from the
/// result rather than causing the whole batch to fail.
pub fn cat_file_batch(repo_root: &Path, hashes: &[String]) -> HashMap<String, Vec<u8>> {
    if hashes.is_empty() {
        return HashMap::new();
    }

    let input = hashes
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n");
    let output = match run_with_stdin_bytes(repo_root, &["cat-file", "--batch"], input) {
        Ok(out) => out,
        Err(err) => {
            warn!(?err, "git cat-file batch failed");
            return HashMap::new();
        }
    };

    parse_cat_file_batch(hashes, &output)
}

/// `git cat-file --batch` emits, per requested object:
/// `<hash> <type> <size>\n<size bytes of content>\n`, or `<hash> missing\n`.
fn parse_cat_file_batch(requested: &[String], output: &[u8]) -> HashMap<String, Vec<u8>> {
    let mut out = HashMap::new();
    let mut cursor = 0usize;
    let mut requested_iter = requested.iter();

    while cursor < output.len() {
        let Some(newline) = output[cursor..].iter().position(|&b| b == b'\n') else {
            break;
        };
        let header = String::from_utf8_lossy(&output[cursor..cursor + newline]).into_owned();
        cursor += newline + 1;
        let Some(hash) = requested_iter.next() else {
            break;
        };

        if header.ends_with("missing") {
            continue;
        }
        let mut parts = header.split_whitespace();
        let _hash = parts.next();
        let _kind = parts.next();
        let Some(size) = parts.next().and_then(|s| s.parse::<usize>().ok()) else {
            continue;
        };
        if cursor + size > output.len() {
            break;
        }
        out.insert(hash.clone(), output[cursor..cursor + size].to_vec());
        cursor += size + 1; // skip the trailing newline after the object body
    }
    out
}

fn run_with_stdin(repo_root: &Path, args: &[&str], input: String) -> ResolverResult<String> {
    let bytes = run_with_stdin_bytes(repo_root, args, input)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn run_with_stdin_bytes(repo_root: &Path, args: &[&str], input: String) -> ResolverResult<Vec<u8>> {
    let mut child = Command::new("git")
        .current_dir(repo_root)
        .envs(git_env(repo_root))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes())?;
    }

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            let mut stdout = Vec::new();
            if let Some(mut out) = child.stdout.take() {
                use std::io::Read;
                out.read_to_end(&mut stdout)?;
            }
            if !status.success() {
                let mut stderr = String::new();
                if let Some(mut err) = child.stderr.take() {
                    use std::io::Read;
                    err.read_to_string(&mut stderr).ok();
                }
                return Err(ResolverError::GitFailed(stderr));
            }
            return Ok(stdout);
        }
        if started.elapsed() > SUBPROCESS_TIMEOUT {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ResolverError::Timeout(SUBPROCESS_TIMEOUT));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cat_file_batch_extracts_content_and_skips_missing() {
        let requested = vec!["aaa".to_string(), "bbb".to_string()];
        let mut output = Vec::new();
        output.extend_from_slice(b"aaa blob 5\nhello\n");
        output.extend_from_slice(b"bbb missing\n");
        let parsed = parse_cat_file_batch(&requested, &output);
        assert_eq!(parsed.get("aaa").map(|v| v.as_slice()), Some(&b"hello"[..]));
        assert!(!parsed.contains_key("bbb"));
    }

    #[test]
    fn hash_object_batch_on_real_repo() {
        let dir = tempfile::tempdir().unwrap();
        Command::new("git").current_dir(dir.path()).args(["init", "-q"]).output().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let hashes = hash_object_batch(dir.path(), &["a.py".to_string()]);
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes.get("a.py").map(|h| h.len()), Some(40));
    }

    #[test]
    fn cat_file_batch_round_trips_with_hash_object() {
        let dir = tempfile::tempdir().unwrap();
        Command::new("git").current_dir(dir.path()).args(["init", "-q"]).output().unwrap();
        std::fs::write(dir.path().join("a.py"), "hello world\n").unwrap();
        let hashes = hash_object_batch(dir.path(), &["a.py".to_string()]);
        let hash = hashes.get("a.py").unwrap().clone();
        Command::new("git")
            .current_dir(dir.path())
            .args(["hash-object", "-w", "a.py"])
            .output()
            .unwrap();
        let contents = cat_file_batch(dir.path(), &[hash.clone()]);
        assert_eq!(
            contents.get(&hash).map(|c| c.as_slice()),
            Some(&b"hello world\n"[..])
        );
    }
}
