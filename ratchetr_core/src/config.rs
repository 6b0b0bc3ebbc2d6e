//! Configuration shapes accepted by the core, and the TOML/YAML merge logic
//! described by spec §6. File *discovery* (finding `ratchetr.toml` on disk)
//! stays the caller's responsibility; this module owns turning an already-
//! located file's contents into the structs the rest of the crate consumes,
//! plus the deterministic canonical-JSON hashing helper reused by the plan
//! builder, the cache, and the ratchet engine's signature hash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// [paths]
// ---------------------------------------------------------------------------

/// `[paths]` section: `ratchetr_dir`, `manifest_path`, `cache_dir`, `log_dir`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    pub ratchetr_dir: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// [audit]
// ---------------------------------------------------------------------------

/// `fail_on` policy: which severities trigger a non-zero exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailOn {
    Errors,
    Warnings,
    Any,
    #[default]
    Never,
}

/// `hash_workers = "auto" | <int >= 0>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HashWorkers {
    Auto,
    Fixed(usize),
}

impl HashWorkers {
    /// Parse a raw TOML value (`"auto"` or a non-negative integer). Invalid
    /// specs fall back to `Fixed(1)` per spec §4.B.
    #[must_use]
    pub fn parse_str(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("auto") {
            return Self::Auto;
        }
        raw.parse::<usize>().map(Self::Fixed).unwrap_or(Self::Fixed(1))
    }
}

/// Per-engine settings: `[audit.engines.<engine>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub plugin_args: Vec<String>,
    #[serde(default)]
    pub config_file: Option<PathBuf>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

/// A named profile: `[audit.engines.<engine>.profiles.<profile>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub inherit: Option<String>,
    #[serde(default)]
    pub plugin_args: Vec<String>,
    #[serde(default)]
    pub config_file: Option<PathBuf>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A per-directory override (`ratchetr.dir.toml`), applied only when a
/// scanned path lies under `path`, longest-prefix-first (spec §9).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOverride {
    pub path: String,
    #[serde(default)]
    pub engine_settings: HashMap<String, EngineSettings>,
    #[serde(default)]
    pub active_profiles: HashMap<String, String>,
}

/// `[audit]` + nested sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub skip_current: bool,
    #[serde(default)]
    pub skip_target: bool,
    #[serde(default)]
    pub fail_on: FailOn,
    #[serde(default)]
    pub hash_workers: Option<HashWorkers>,
    #[serde(default)]
    pub runners: Vec<String>,
    #[serde(default)]
    pub plugin_args: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub engines: HashMap<String, EngineSettings>,
    #[serde(default)]
    pub active_profiles: HashMap<String, String>,
    #[serde(default)]
    pub path_overrides: Vec<PathOverride>,
}

fn default_max_depth() -> usize {
    3
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            include_paths: Vec::new(),
            max_depth: default_max_depth(),
            skip_current: false,
            skip_target: false,
            fail_on: FailOn::default(),
            hash_workers: None,
            runners: Vec::new(),
            plugin_args: HashMap::new(),
            engines: HashMap::new(),
            active_profiles: HashMap::new(),
            path_overrides: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// [ratchet]
// ---------------------------------------------------------------------------

/// How engine-signature drift between a ratchet and a manifest is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignaturePolicy {
    #[default]
    Fail,
    Warn,
    Ignore,
}

/// `[ratchet]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatchetConfig {
    #[serde(default = "default_severities")]
    pub severities: Vec<String>,
    #[serde(default)]
    pub signature: SignaturePolicy,
    #[serde(default)]
    pub targets: HashMap<String, i64>,
    #[serde(default)]
    pub runs: Vec<String>,
    #[serde(default)]
    pub summary_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn default_severities() -> Vec<String> {
    vec!["error".to_owned(), "warning".to_owned()]
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self {
            severities: default_severities(),
            signature: SignaturePolicy::default(),
            targets: HashMap::new(),
            runs: Vec::new(),
            summary_only: false,
            limit: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// The full shape described by spec §6: `[audit]`, `[ratchet]`, `[paths]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatchetrConfig {
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub ratchet: RatchetConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Errors while parsing an already-located config file's contents.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RatchetrConfig {
    /// Parse a standalone `ratchetr.toml` / `.ratchetr.toml` document.
    ///
    /// # Errors
    /// Returns an error if `contents` is not valid TOML for this shape.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Parse the `[tool.ratchetr]` table out of a `pyproject.toml` document.
    /// Returns `Ok(None)` when no such table is present.
    ///
    /// # Errors
    /// Returns an error if `contents` is not valid TOML.
    pub fn from_pyproject_toml(contents: &str) -> Result<Option<Self>, ConfigError> {
        #[derive(Deserialize)]
        struct Pyproject {
            tool: Option<Tool>,
        }
        #[derive(Deserialize)]
        struct Tool {
            ratchetr: Option<RatchetrConfig>,
        }
        let parsed: Pyproject = toml::from_str(contents)?;
        Ok(parsed.tool.and_then(|t| t.ratchetr))
    }
}

/// Load `ratchetr.toml`/`.ratchetr.toml`, then `[tool.ratchetr]` in
/// `pyproject.toml`, else defaults. First file found wins (per spec §6,
/// a standalone file takes precedence over the `pyproject.toml` table).
///
/// # Errors
/// Returns an error if a found file cannot be read or parsed.
pub fn load_from_project(root: &Path) -> Result<RatchetrConfig, ConfigError> {
    for name in ["ratchetr.toml", ".ratchetr.toml"] {
        let candidate = root.join(name);
        if candidate.is_file() {
            let contents = std::fs::read_to_string(&candidate).unwrap_or_default();
            return RatchetrConfig::from_toml(&contents);
        }
    }
    let pyproject = root.join("pyproject.toml");
    if pyproject.is_file() {
        let contents = std::fs::read_to_string(&pyproject).unwrap_or_default();
        if let Some(config) = RatchetrConfig::from_pyproject_toml(&contents)? {
            return Ok(config);
        }
    }
    Ok(RatchetrConfig::default())
}

// ---------------------------------------------------------------------------
// Canonical JSON hashing
// ---------------------------------------------------------------------------

/// Produce a canonical JSON string with recursively sorted object keys, so
/// hashing is independent of `HashMap` iteration order.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut buf = String::new();
    write_canonical(value, &mut buf);
    buf
}

fn write_canonical(value: &serde_json::Value, buf: &mut String) {
    use std::fmt::Write;

    match value {
        serde_json::Value::Null => buf.push_str("null"),
        serde_json::Value::Bool(b) => {
            let _ = write!(buf, "{b}");
        }
        serde_json::Value::Number(n) => {
            let _ = write!(buf, "{n}");
        }
        serde_json::Value::String(s) => {
            let _ = write!(buf, "{}", serde_json::to_string(s).unwrap_or_default());
        }
        serde_json::Value::Array(arr) => {
            buf.push('[');
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_canonical(v, buf);
            }
            buf.push(']');
        }
        serde_json::Value::Object(map) => {
            buf.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                let _ = write!(buf, "{}", serde_json::to_string(*k).unwrap_or_default());
                buf.push(':');
                write_canonical(&map[*k], buf);
            }
            buf.push('}');
        }
    }
}

/// SHA-256 hex digest of a value's canonical JSON form.
#[must_use]
pub fn content_hash(value: &serde_json::Value) -> String {
    use sha2::{Digest, Sha256};

    let canonical = canonical_json(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_audit_config_matches_spec_defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.max_depth, 3);
        assert!(!config.skip_current);
        assert!(!config.skip_target);
        assert_eq!(config.fail_on, FailOn::Never);
    }

    #[test]
    fn default_ratchet_severities_are_error_and_warning() {
        let config = RatchetConfig::default();
        assert_eq!(config.severities, vec!["error", "warning"]);
        assert_eq!(config.signature, SignaturePolicy::Fail);
    }

    #[test]
    fn hash_workers_parses_auto_and_falls_back_on_invalid() {
        assert_eq!(HashWorkers::parse_str("auto"), HashWorkers::Auto);
        assert_eq!(HashWorkers::parse_str("AUTO"), HashWorkers::Auto);
        assert_eq!(HashWorkers::parse_str("4"), HashWorkers::Fixed(4));
        assert_eq!(HashWorkers::parse_str("bogus"), HashWorkers::Fixed(1));
    }

    #[test]
    fn content_hash_is_deterministic_regardless_of_key_order() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn content_hash_changes_with_value() {
        let a = serde_json::json!({"a": 1});
        let b = serde_json::json!({"a": 2});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn load_from_project_parses_standalone_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ratchetr.toml"),
            "[audit]\ninclude_paths = [\"apps\"]\nfail_on = \"errors\"\n",
        )
        .unwrap();
        let config = load_from_project(dir.path()).unwrap();
        assert_eq!(config.audit.include_paths, vec!["apps"]);
        assert_eq!(config.audit.fail_on, FailOn::Errors);
    }

    #[test]
    fn load_from_project_falls_back_to_pyproject_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.ratchetr.audit]\nmax_depth = 5\n",
        )
        .unwrap();
        let config = load_from_project(dir.path()).unwrap();
        assert_eq!(config.audit.max_depth, 5);
    }

    #[test]
    fn load_from_project_defaults_when_nothing_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from_project(dir.path()).unwrap();
        assert_eq!(config.audit.max_depth, 3);
    }
}
