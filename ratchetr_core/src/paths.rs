//! Path & Project Resolver — component A.
//!
//! Deterministic resolution of `repo_root`, `tool_home`, `cache_dir`,
//! `log_dir`, `manifest_path`, and optional `config_path` from CLI/env/config
//! sources, plus the separate manifest-discovery operation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::PathsConfig;

/// Marker files that identify a repository root, checked in this order.
const ROOT_MARKERS: &[&str] = &["ratchetr.toml", ".ratchetr.toml", "pyproject.toml"];

/// Conventional manifest file names probed (relative to `repo_root`) when no
/// CLI/env/config path is supplied, beyond the default `tool_home/manifest.json`.
const MANIFEST_CANDIDATE_NAMES: &[&str] = &[
    "typing_audit.json",
    "typing_audit_manifest.json",
    "reports/typing/typing_audit.json",
    "reports/typing/manifest.json",
];

const DEFAULT_TOOL_HOME_DIRNAME: &str = ".ratchetr";
const DEFAULT_CACHE_DIRNAME: &str = ".cache";
const DEFAULT_LOG_DIRNAME: &str = "logs";
const DEFAULT_MANIFEST_FILENAME: &str = "manifest.json";

pub const CONFIG_ENV: &str = "RATCHETR_CONFIG";
pub const ROOT_ENV: &str = "RATCHETR_ROOT";
pub const TOOL_HOME_ENV: &str = "RATCHETR_DIR";
pub const MANIFEST_ENV: &str = "RATCHETR_MANIFEST";
pub const CACHE_ENV: &str = "RATCHETR_CACHE_DIR";
pub const LOG_ENV: &str = "RATCHETR_LOG_DIR";

/// CLI-sourced overrides for core paths. All fields optional; absence means
/// "fall through to the next precedence level".
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub config_path: Option<PathBuf>,
    pub repo_root: Option<PathBuf>,
    pub tool_home: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

/// Environment-sourced overrides, read once via [`EnvOverrides::from_environ`].
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub config_path: Option<PathBuf>,
    pub repo_root: Option<PathBuf>,
    pub tool_home: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl EnvOverrides {
    /// Read overrides from `environ` (use `std::env::vars()` collected into
    /// a map in production; tests pass a fixed map).
    #[must_use]
    pub fn from_environ(environ: &HashMap<String, String>) -> Self {
        let tool_home = path_from_env(environ, TOOL_HOME_ENV);
        let mut cache_dir = path_from_env(environ, CACHE_ENV);
        let mut log_dir = path_from_env(environ, LOG_ENV);
        if let Some(ref home) = tool_home {
            cache_dir = cache_dir.or_else(|| Some(home.join(DEFAULT_CACHE_DIRNAME)));
            log_dir = log_dir.or_else(|| Some(home.join(DEFAULT_LOG_DIRNAME)));
        }
        Self {
            config_path: path_from_env(environ, CONFIG_ENV),
            repo_root: path_from_env(environ, ROOT_ENV),
            tool_home,
            manifest_path: path_from_env(environ, MANIFEST_ENV),
            cache_dir,
            log_dir,
        }
    }
}

fn path_from_env(environ: &HashMap<String, String>, name: &str) -> Option<PathBuf> {
    let raw = environ.get(name)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

/// Effective, fully-resolved locations for repository-scoped artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub repo_root: PathBuf,
    pub tool_home: PathBuf,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub config_path: Option<PathBuf>,
}

/// Walk `cwd` upward looking for one of [`ROOT_MARKERS`]. Falls back to
/// `cwd` itself (a fallback the caller should log).
#[must_use]
pub fn discover_repo_root(cwd: &Path) -> PathBuf {
    let mut dir = cwd;
    loop {
        if ROOT_MARKERS.iter().any(|marker| dir.join(marker).is_file()) {
            return dir.to_path_buf();
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return cwd.to_path_buf(),
        }
    }
}

/// Resolve all core paths using CLI override > env override > config value >
/// default-relative-to-repo_root precedence, per field.
#[must_use]
pub fn resolve_paths(
    cli: &PathOverrides,
    env: &EnvOverrides,
    config: &PathsConfig,
    config_path: Option<&Path>,
    cwd: &Path,
) -> ResolvedPaths {
    let repo_root = resolve_repo_root(cli.repo_root.as_deref(), env.repo_root.as_deref(), config_path, cwd);

    let tool_home = resolve_from(
        &repo_root,
        cli.tool_home.as_deref(),
        env.tool_home.as_deref(),
        config.ratchetr_dir.as_deref(),
    )
    .unwrap_or_else(|| repo_root.join(DEFAULT_TOOL_HOME_DIRNAME));

    let cache_dir = resolve_from(
        &repo_root,
        cli.cache_dir.as_deref(),
        env.cache_dir.as_deref(),
        config.cache_dir.as_deref(),
    )
    .unwrap_or_else(|| tool_home.join(DEFAULT_CACHE_DIRNAME));

    let log_dir = resolve_from(
        &repo_root,
        cli.log_dir.as_deref(),
        env.log_dir.as_deref(),
        config.log_dir.as_deref(),
    )
    .unwrap_or_else(|| tool_home.join(DEFAULT_LOG_DIRNAME));

    let manifest_path = resolve_from(
        &repo_root,
        cli.manifest_path.as_deref(),
        env.manifest_path.as_deref(),
        config.manifest_path.as_deref(),
    )
    .unwrap_or_else(|| tool_home.join(DEFAULT_MANIFEST_FILENAME));

    let resolved_config_path = cli
        .config_path
        .clone()
        .or_else(|| env.config_path.clone())
        .or_else(|| config_path.map(Path::to_path_buf));

    ResolvedPaths {
        repo_root,
        tool_home,
        cache_dir,
        log_dir,
        manifest_path,
        config_path: resolved_config_path,
    }
}

fn resolve_repo_root(
    cli_root: Option<&Path>,
    env_root: Option<&Path>,
    config_path: Option<&Path>,
    cwd: &Path,
) -> PathBuf {
    if let Some(root) = cli_root {
        return resolve_required(cwd, root);
    }
    if let Some(root) = env_root {
        return resolve_required(cwd, root);
    }
    if let Some(path) = config_path {
        if let Some(parent) = path.parent() {
            return parent.to_path_buf();
        }
    }
    discover_repo_root(cwd)
}

fn resolve_from(
    repo_root: &Path,
    cli_value: Option<&Path>,
    env_value: Option<&Path>,
    config_value: Option<&Path>,
) -> Option<PathBuf> {
    cli_value
        .or(env_value)
        .or(config_value)
        .map(|candidate| resolve_required(repo_root, candidate))
}

fn resolve_required(base_dir: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

/// Diagnostics accumulated during manifest discovery, useful for error
/// messages and for debugging ambiguous results.
#[derive(Debug, Clone, Default)]
pub struct ManifestDiagnostics {
    pub attempted_paths: Vec<PathBuf>,
    pub matched_paths: Vec<PathBuf>,
    pub ambiguity: Option<String>,
}

/// Outcome of [`discover_manifest`].
#[derive(Debug, Clone)]
pub struct ManifestDiscoveryResult {
    pub manifest_path: Option<PathBuf>,
    pub diagnostics: ManifestDiagnostics,
}

impl ManifestDiscoveryResult {
    #[must_use]
    pub fn found(&self) -> bool {
        self.manifest_path.is_some() && self.diagnostics.ambiguity.is_none()
    }
}

/// Probe CLI path, env path, config path, then [`MANIFEST_CANDIDATE_NAMES`]
/// plus the default `tool_home/manifest.json`, returning the first match and
/// flagging ambiguity when more than one conventional candidate exists.
#[must_use]
pub fn discover_manifest(
    resolved: &ResolvedPaths,
    cli_manifest: Option<&Path>,
    env: &EnvOverrides,
    config_manifest: Option<&Path>,
) -> ManifestDiscoveryResult {
    let mut attempted = Vec::new();
    let mut matches = Vec::new();

    if let Some(cli) = cli_manifest {
        let candidate = resolve_required(&resolved.repo_root, cli);
        attempted.push(candidate.clone());
        if candidate.is_file() {
            return ManifestDiscoveryResult {
                manifest_path: Some(candidate.clone()),
                diagnostics: ManifestDiagnostics {
                    attempted_paths: attempted,
                    matched_paths: vec![candidate],
                    ambiguity: None,
                },
            };
        }
        return ManifestDiscoveryResult {
            manifest_path: None,
            diagnostics: ManifestDiagnostics {
                attempted_paths: attempted,
                matched_paths: Vec::new(),
                ambiguity: None,
            },
        };
    }

    for option in [env.manifest_path.as_deref(), config_manifest, Some(resolved.manifest_path.as_path())] {
        if let Some(path) = option {
            let candidate = resolve_required(&resolved.repo_root, path);
            record_candidate(candidate, &mut attempted, &mut matches);
        }
    }
    for name in MANIFEST_CANDIDATE_NAMES {
        record_candidate(resolved.repo_root.join(name), &mut attempted, &mut matches);
    }

    let manifest_path = matches.first().cloned();
    let ambiguity = if matches.len() > 1 {
        Some(format!(
            "multiple manifests found; using {}",
            manifest_path.as_ref().unwrap().display()
        ))
    } else {
        None
    };

    ManifestDiscoveryResult {
        manifest_path,
        diagnostics: ManifestDiagnostics {
            attempted_paths: attempted,
            matched_paths: matches,
            ambiguity,
        },
    }
}

fn record_candidate(path: PathBuf, attempted: &mut Vec<PathBuf>, matches: &mut Vec<PathBuf>) {
    if attempted.contains(&path) {
        return;
    }
    if path.is_file() {
        matches.push(path.clone());
    }
    attempted.push(path);
}
