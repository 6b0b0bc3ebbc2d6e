//! Result Cache — component E.
//!
//! Caches a whole [`crate::orchestrator::EngineResult`] by a composite key:
//! engine identity, mode, canonicalised options, and the exact set of file
//! fingerprints the run touched. A hit requires byte-for-byte equality of
//! `file_hashes`, not just a version match — any file drift is a miss.
//!
//! Concurrency follows the teacher's pattern (atomic temp-file + rename) but
//! adds an exclusive file lock around the read-modify-write cycle, since
//! several engines may flush to the same cache file within one audit run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::FileFingerprint;
use crate::lock::ExclusiveLock;
use crate::orchestrator::EngineResult;
use crate::plan::EnginePlan;

/// Cache format version. Bumping this invalidates every existing entry.
const CACHE_VERSION: &str = "1";

/// Current tool version, folded into the cache key so a `ratchetr-core`
/// upgrade never reuses results produced by a different parsing/behaviour.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Composite identity of one cached (engine, mode) invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    pub engine: String,
    /// Included deliberately, unlike [`EnginePlan::is_equivalent_to`]: two
    /// plans that are equivalent except for mode must still cache
    /// separately, since `current` and `target` runs produce different
    /// diagnostics for the same scope.
    pub mode: String,
    pub options_hash: String,
    pub tool_version: String,
    /// Sorted, deduped extra files (e.g. `pyrightconfig.json`) whose content
    /// participates in this key.
    pub fingerprint_targets: Vec<String>,
}

impl CacheKey {
    #[must_use]
    pub fn for_plan(plan: &EnginePlan, fingerprint_targets: &[String]) -> Self {
        let mut targets = fingerprint_targets.to_vec();
        targets.sort();
        targets.dedup();
        Self {
            engine: plan.engine_name.as_str().to_owned(),
            mode: plan.mode.to_string(),
            options_hash: plan.options_hash(),
            tool_version: TOOL_VERSION.to_owned(),
            fingerprint_targets: targets,
        }
    }

    #[must_use]
    pub fn digest(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        crate::config::content_hash(&value)
    }
}

/// One cached (engine, mode) result plus the file-hash snapshot it was
/// computed against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub file_hashes: BTreeMap<String, FileFingerprint>,
    pub result: EngineResult,
    pub cached_at: DateTime<Utc>,
}

/// On-disk cache envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheFile {
    pub version: String,
    /// Keyed by [`CacheKey::digest`].
    pub entries: BTreeMap<String, CacheEntry>,
}

impl Default for CacheFile {
    fn default() -> Self {
        Self { version: CACHE_VERSION.to_owned(), entries: BTreeMap::new() }
    }
}

/// The result cache for one audit run. Holds the whole cache file in memory
/// and flushes atomically on [`ResultCache::flush`].
pub struct ResultCache {
    cache_path: PathBuf,
    file: CacheFile,
}

impl ResultCache {
    /// Load the cache from `cache_path`, degrading to an empty cache on any
    /// I/O or parse failure (a corrupt cache is never a hard error).
    #[must_use]
    pub fn load(cache_path: &Path) -> Self {
        let file = load_cache_file(cache_path);
        Self { cache_path: cache_path.to_owned(), file }
    }

    /// Look up a cached result. A hit requires the key to match exactly
    /// *and* the supplied `file_hashes` to equal the snapshot stored at
    /// write time — any fingerprint drift, even for an untouched key, is a
    /// miss (spec §4.E).
    #[must_use]
    pub fn lookup(&self, key: &CacheKey, file_hashes: &BTreeMap<String, FileFingerprint>) -> Option<&EngineResult> {
        let entry = self.file.entries.get(&key.digest())?;
        if &entry.key != key {
            return None;
        }
        if &entry.file_hashes != file_hashes {
            return None;
        }
        Some(&entry.result)
    }

    /// Store (or overwrite) a result for `key`.
    pub fn store(&mut self, key: CacheKey, file_hashes: BTreeMap<String, FileFingerprint>, result: EngineResult, now: DateTime<Utc>) {
        let digest = key.digest();
        self.file.entries.insert(digest, CacheEntry { key, file_hashes, result, cached_at: now });
    }

    /// Persist the cache atomically: write to a pid-suffixed temp file, then
    /// rename over the real path. Held under an exclusive lock so
    /// concurrent audit runs against the same cache file don't interleave
    /// writes.
    pub fn flush(&self) -> std::io::Result<()> {
        let _lock = ExclusiveLock::acquire(&self.cache_path)?;

        let json = serde_json::to_string_pretty(&self.file).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pid = std::process::id();
        let tmp_path = self.cache_path.with_extension(format!("json.tmp.{pid}"));
        std::fs::write(&tmp_path, &json)?;
        match std::fs::rename(&tmp_path, &self.cache_path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                Err(e)
            }
        }
    }
}

fn load_cache_file(cache_path: &Path) -> CacheFile {
    if !cache_path.is_file() {
        return CacheFile::default();
    }
    let content = match std::fs::read_to_string(cache_path) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("failed to read cache file {}: {}", cache_path.display(), e);
            return CacheFile::default();
        }
    };
    let file: CacheFile = match serde_json::from_str(&content) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("corrupt cache file {} ({}); rebuilding", cache_path.display(), e);
            return CacheFile::default();
        }
    };
    if file.version != CACHE_VERSION {
        log::info!("cache format version mismatch ({} != {}); invalidating", file.version, CACHE_VERSION);
        return CacheFile::default();
    }
    file
}
