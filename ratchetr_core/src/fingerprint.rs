//! File Fingerprinter — component B.
//!
//! Enumerates candidate `.py`/`.pyi` files under a set of include roots,
//! hashes their contents with a bounded worker pool, and enforces file/byte
//! budgets. Output is a deterministic `RelPath -> FileFingerprint` map plus a
//! `truncated` flag that downstream treats as a cache-key invalidator.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const TRACKED_EXTENSIONS: &[&str] = &["py", "pyi"];

/// Content fingerprint of one file, or a sentinel for files that could not
/// be stat'd/read. Sentinels still participate in hashing as stable tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileFingerprint {
    Present { hash: String, mtime: i64, size: u64 },
    Missing { missing: bool },
    Unreadable { unreadable: bool },
}

impl FileFingerprint {
    #[must_use]
    pub fn missing() -> Self {
        Self::Missing { missing: true }
    }

    #[must_use]
    pub fn unreadable() -> Self {
        Self::Unreadable { unreadable: true }
    }
}

/// Result of [`fingerprint_files`]: a deterministic map plus whether a
/// budget cut the enumeration short.
#[derive(Debug, Clone, Default)]
pub struct FingerprintResult {
    pub fingerprints: BTreeMap<String, FileFingerprint>,
    pub truncated: bool,
}

/// Resolved worker-pool size for hashing: `hash_workers` if set, else the
/// `RATCHETR_HASH_WORKERS` env var if set, else `1`. `"auto"` means "number
/// of CPUs, minimum 1"; invalid specs fall back to 1.
#[must_use]
pub fn effective_hash_workers(hash_workers: Option<crate::config::HashWorkers>, env_value: Option<&str>) -> usize {
    let setting = hash_workers.or_else(|| env_value.map(crate::config::HashWorkers::parse_str));
    match setting {
        Some(crate::config::HashWorkers::Fixed(n)) => n.max(1),
        Some(crate::config::HashWorkers::Auto) => {
            std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1)
        }
        None => 1,
    }
}

/// Inputs for [`fingerprint_files`].
pub struct FingerprintRequest<'a> {
    pub repo_root: &'a Path,
    pub include_roots: &'a [String],
    pub max_files: Option<usize>,
    pub max_bytes: Option<u64>,
    pub respect_gitignore: bool,
    pub baseline: Option<&'a BTreeMap<String, FileFingerprint>>,
    pub hash_workers: usize,
}

/// Enumerate, budget, and hash files under `request.include_roots`.
/// Deterministic given identical filesystem state.
#[must_use]
pub fn fingerprint_files(request: &FingerprintRequest<'_>) -> FingerprintResult {
    let mut candidates = enumerate_candidates(request.repo_root, request.include_roots, request.respect_gitignore);
    candidates.sort();
    candidates.dedup();

    let mut accepted: Vec<String> = Vec::new();
    let mut cumulative_bytes: u64 = 0;
    let mut truncated = false;

    for rel_path in candidates {
        let abs_path = request.repo_root.join(&rel_path);
        let size = fs::metadata(&abs_path).map(|m| m.len()).unwrap_or(0);

        if let Some(max_files) = request.max_files {
            if accepted.len() >= max_files {
                truncated = true;
                break;
            }
        }
        if let Some(max_bytes) = request.max_bytes {
            if cumulative_bytes + size > max_bytes {
                truncated = true;
                break;
            }
        }
        cumulative_bytes += size;
        accepted.push(rel_path);
    }

    let mut fingerprints = BTreeMap::new();
    let mut to_hash: Vec<String> = Vec::new();

    for rel_path in &accepted {
        let abs_path = request.repo_root.join(rel_path);
        match fs::metadata(&abs_path) {
            Err(_) => {
                fingerprints.insert(rel_path.clone(), FileFingerprint::missing());
            }
            Ok(meta) => {
                let size = meta.len();
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs() as i64);

                if let Some(baseline) = request.baseline {
                    if let Some(FileFingerprint::Present { hash, mtime: base_mtime, size: base_size }) =
                        baseline.get(rel_path)
                    {
                        if *base_mtime == mtime && *base_size == size {
                            fingerprints.insert(
                                rel_path.clone(),
                                FileFingerprint::Present { hash: hash.clone(), mtime, size },
                            );
                            continue;
                        }
                    }
                }
                to_hash.push(rel_path.clone());
            }
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(request.hash_workers.max(1))
        .build();

    let hashed: Vec<(String, FileFingerprint)> = match pool {
        Ok(pool) => pool.install(|| {
            to_hash
                .par_iter()
                .map(|rel_path| (rel_path.clone(), hash_one(request.repo_root, rel_path)))
                .collect()
        }),
        Err(_) => to_hash
            .iter()
            .map(|rel_path| (rel_path.clone(), hash_one(request.repo_root, rel_path)))
            .collect(),
    };

    for (rel_path, fp) in hashed {
        fingerprints.insert(rel_path, fp);
    }

    FingerprintResult { fingerprints, truncated }
}

fn hash_one(repo_root: &Path, rel_path: &str) -> FileFingerprint {
    let abs_path = repo_root.join(rel_path);
    let Ok(meta) = fs::metadata(&abs_path) else {
        return FileFingerprint::missing();
    };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64);
    let size = meta.len();

    match fs::read(&abs_path) {
        Ok(bytes) => {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            FileFingerprint::Present {
                hash: format!("sha256:{}", hex::encode(hasher.finalize())),
                mtime,
                size,
            }
        }
        Err(_) => FileFingerprint::unreadable(),
    }
}

fn enumerate_candidates(repo_root: &Path, include_roots: &[String], respect_gitignore: bool) -> Vec<String> {
    let roots: Vec<&str> = if include_roots.is_empty() { vec![""] } else { include_roots.iter().map(String::as_str).collect() };
    let mut candidates = Vec::new();

    for root in roots {
        let walk_root = if root.is_empty() { repo_root.to_path_buf() } else { repo_root.join(root) };
        if !walk_root.exists() {
            continue;
        }
        let mut builder = ignore::WalkBuilder::new(&walk_root);
        builder.git_ignore(respect_gitignore).git_global(false).git_exclude(false).hidden(false);
        for entry in builder.build().flatten() {
            if entry.file_type().is_some_and(|ft| ft.is_file()) {
                let path = entry.path();
                let has_tracked_ext = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| TRACKED_EXTENSIONS.contains(&ext));
                if !has_tracked_ext {
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(repo_root) {
                    candidates.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(repo_root: &'a Path, include_roots: &'a [String]) -> FingerprintRequest<'a> {
        FingerprintRequest {
            repo_root,
            include_roots,
            max_files: None,
            max_bytes: None,
            respect_gitignore: false,
            baseline: None,
            hash_workers: 1,
        }
    }

    #[test]
    fn enumerates_python_files_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.py"), "b = 1").unwrap();
        std::fs::write(dir.path().join("a.py"), "a = 1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        let roots = vec![String::new()];
        let result = fingerprint_files(&request(dir.path(), &roots));
        let keys: Vec<&String> = result.fingerprints.keys().collect();
        assert_eq!(keys, vec!["a.py", "b.py"]);
        assert!(!result.truncated);
    }

    #[test]
    fn includes_pyi_stub_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pyi"), "x: int").unwrap();
        let roots = vec![String::new()];
        let result = fingerprint_files(&request(dir.path(), &roots));
        assert!(result.fingerprints.contains_key("a.pyi"));
    }

    #[test]
    fn hash_is_deterministic_given_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1").unwrap();
        let roots = vec![String::new()];
        let r1 = fingerprint_files(&request(dir.path(), &roots));
        let r2 = fingerprint_files(&request(dir.path(), &roots));
        assert_eq!(r1.fingerprints, r2.fingerprints);
    }

    #[test]
    fn max_files_budget_sets_truncated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "a").unwrap();
        std::fs::write(dir.path().join("b.py"), "b").unwrap();
        let roots = vec![String::new()];
        let mut req = request(dir.path(), &roots);
        req.max_files = Some(1);
        let result = fingerprint_files(&req);
        assert!(result.truncated);
        assert_eq!(result.fingerprints.len(), 1);
    }

    #[test]
    fn baseline_reuse_skips_rehash_when_size_and_mtime_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "x = 1").unwrap();
        let roots = vec![String::new()];
        let first = fingerprint_files(&request(dir.path(), &roots));

        let mut req = request(dir.path(), &roots);
        req.baseline = Some(&first.fingerprints);
        let second = fingerprint_files(&req);
        assert_eq!(first.fingerprints, second.fingerprints);
    }

    #[test]
    fn effective_hash_workers_prefers_explicit_over_env_over_default() {
        assert_eq!(
            effective_hash_workers(Some(crate::config::HashWorkers::Fixed(4)), Some("8")),
            4
        );
        assert_eq!(effective_hash_workers(None, Some("3")), 3);
        assert_eq!(effective_hash_workers(None, None), 1);
    }

    #[test]
    fn missing_file_in_baseline_path_yields_missing_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut fingerprints = BTreeMap::new();
        fingerprints.insert("gone.py".to_owned(), FileFingerprint::Present {
            hash: "sha256:deadbeef".to_owned(),
            mtime: 0,
            size: 0,
        });
        let roots = vec![String::new()];
        let mut req = request(dir.path(), &roots);
        req.baseline = Some(&fingerprints);
        // gone.py isn't on disk so it won't be a candidate at all; this just
        // exercises that an empty candidate set with a stale baseline works.
        let result = fingerprint_files(&req);
        assert!(result.fingerprints.is_empty());
    }
}
