//! Ratchet Engine — component H.
//!
//! A ratchet is a per-path, per-severity budget: "the worst state we
//! currently tolerate". `init` bootstraps one from a manifest; `check`
//! compares a manifest against it (violations when a path got worse,
//! improvements when it got better); `update` tightens it monotonically to
//! the current manifest without ever loosening past the configured target;
//! `rebaseline` refreshes only the engine-signature fingerprint.
//!
//! The CLI-facing concerns (argument parsing, which runs are selected, where
//! the ratchet file lives) stay out of this module; every operation here is
//! a plain function over already-resolved arguments, mirroring how the
//! original `typewiz.cli.commands.ratchet` module is a thin shell around a
//! services layer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RatchetrError;
use crate::lock::ExclusiveLock;
use crate::manifest::{FileSummary, Manifest};
use crate::types::{Mode, Severity};

/// `{tool, mode, engineOptions, hash}`; `hash` is `config::content_hash` of
/// the canonicalised `(tool, mode, engineOptions)` triple. Stored verbatim
/// so `check` can detect engine-configuration drift between a ratchet and
/// the run that produced the manifest it's being checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSignature {
    pub tool: String,
    pub mode: String,
    pub engine_options: serde_json::Value,
    pub hash: String,
}

/// Compute the signature for one (tool, mode) run from its canonicalised
/// options. Callers derive `engine_options` from the same `EnginePlan` the
/// orchestrator ran, typically via `serde_json::to_value` on its
/// `EngineOptions`.
#[must_use]
pub fn compute_engine_signature(tool: &str, mode: Mode, engine_options: &serde_json::Value) -> EngineSignature {
    let hash = crate::config::content_hash(&serde_json::json!({
        "tool": tool,
        "mode": mode.to_string(),
        "engineOptions": engine_options,
    }));
    EngineSignature { tool: tool.to_owned(), mode: mode.to_string(), engine_options: engine_options.clone(), hash }
}

/// Allowed per-severity counts for one path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathBudget {
    pub severities: BTreeMap<Severity, u64>,
}

/// One run's full budget: which severities are tracked, the per-path
/// allowances, the targets that floor future tightening, and the last-seen
/// engine signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatchetRunBudget {
    pub severities: Vec<Severity>,
    pub paths: BTreeMap<String, PathBudget>,
    pub targets: BTreeMap<Severity, i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub engine_signature: Option<EngineSignature>,
}

/// The on-disk ratchet file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatchetModel {
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub manifest_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub project_root: Option<String>,
    pub runs: BTreeMap<String, RatchetRunBudget>,
}

fn count_for_severity(file: &FileSummary, severity: Severity) -> u64 {
    match severity {
        Severity::Error => file.errors,
        Severity::Warning => file.warnings,
        Severity::Information => file.information,
    }
}

fn clamp_nonneg(value: i64) -> i64 {
    value.max(0)
}

/// Parse one `--target` entry: `severity=N` (global) or
/// `tool:mode.severity=N` (scoped to one run). Negative values clamp to 0;
/// blank keys are rejected.
///
/// # Errors
/// Returns [`RatchetrError::RatchetModelValidation`] when `raw` has no `=`,
/// an empty key/run-id/severity segment, or a non-integer value.
pub fn parse_target_entry(raw: &str) -> Result<(Option<String>, Severity, i64), RatchetrError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| RatchetrError::RatchetModelValidation { message: format!("target '{raw}' is missing '='") })?;
    if key.trim().is_empty() {
        return Err(RatchetrError::RatchetModelValidation { message: format!("target '{raw}' has a blank key") });
    }
    let value: i64 = value
        .trim()
        .parse()
        .map_err(|_| RatchetrError::RatchetModelValidation { message: format!("target '{raw}' has a non-integer value") })?;
    let value = clamp_nonneg(value);

    if let Some((run_id, severity_str)) = key.rsplit_once('.') {
        if run_id.trim().is_empty() || severity_str.trim().is_empty() {
            return Err(RatchetrError::RatchetModelValidation { message: format!("target '{raw}' has a blank run id or severity") });
        }
        Ok((Some(run_id.to_owned()), Severity::coerce(severity_str), value))
    } else {
        Ok((None, Severity::coerce(key), value))
    }
}

/// Parse a batch of `--target` entries into global and per-run target maps.
///
/// # Errors
/// Propagates the first [`parse_target_entry`] failure.
pub fn parse_target_entries(raw: &[String]) -> Result<(BTreeMap<Severity, i64>, BTreeMap<String, BTreeMap<Severity, i64>>), RatchetrError> {
    let mut global = BTreeMap::new();
    let mut scoped: BTreeMap<String, BTreeMap<Severity, i64>> = BTreeMap::new();
    for entry in raw {
        let (run_id, severity, value) = parse_target_entry(entry)?;
        match run_id {
            Some(run_id) => {
                scoped.entry(run_id).or_default().insert(severity, value);
            }
            None => {
                global.insert(severity, value);
            }
        }
    }
    Ok((global, scoped))
}

/// Inputs to [`init_ratchet`] beyond the manifest itself.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// `None` selects every run present in the manifest.
    pub selected_runs: Option<Vec<String>>,
    pub severities: Vec<Severity>,
    pub global_targets: BTreeMap<Severity, i64>,
    pub scoped_targets: BTreeMap<String, BTreeMap<Severity, i64>>,
    pub engine_signatures: BTreeMap<String, EngineSignature>,
    pub manifest_path: Option<String>,
    pub project_root: Option<String>,
}

/// Build a fresh budget from `manifest`: baselines every selected run's
/// current per-file severity counts as the allowed state.
#[must_use]
pub fn init_ratchet(manifest: &Manifest, options: &InitOptions, generated_at: DateTime<Utc>) -> RatchetModel {
    let mut runs = BTreeMap::new();
    for (run_id, run_summary) in &manifest.runs {
        if let Some(selected) = &options.selected_runs {
            if !selected.iter().any(|r| r == run_id) {
                continue;
            }
        }

        let mut paths = BTreeMap::new();
        for file in &run_summary.per_file {
            let severities = options.severities.iter().map(|s| (*s, count_for_severity(file, *s))).collect();
            paths.insert(file.path.clone(), PathBudget { severities });
        }

        let mut targets = options.global_targets.clone();
        if let Some(scoped) = options.scoped_targets.get(run_id) {
            targets.extend(scoped.iter().map(|(s, v)| (*s, *v)));
        }

        let engine_signature = options.engine_signatures.get(run_id).cloned();
        runs.insert(run_id.clone(), RatchetRunBudget { severities: options.severities.clone(), paths, targets, engine_signature });
    }

    RatchetModel { generated_at, manifest_path: options.manifest_path.clone(), project_root: options.project_root.clone(), runs }
}

/// A path/severity whose current count exceeds its allowance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub run_id: String,
    pub path: String,
    pub severity: Severity,
    pub allowed: u64,
    pub actual: u64,
}

/// A path/severity whose current count is below its allowance (a candidate
/// for `update` to tighten).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Improvement {
    pub run_id: String,
    pub path: String,
    pub severity: Severity,
    pub allowed: u64,
    pub actual: u64,
}

/// One run's comparison result.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub severities: Vec<Severity>,
    pub violations: Vec<Violation>,
    pub improvements: Vec<Improvement>,
    pub signature_matches: bool,
}

/// The full comparison across every run in the ratchet.
#[derive(Debug, Clone)]
pub struct RatchetReport {
    pub runs: Vec<RunReport>,
    /// `false` if any run has a violation, or (under [`crate::config::SignaturePolicy::Fail`])
    /// a signature mismatch.
    pub passed: bool,
}

fn signature_matches(stored: &Option<EngineSignature>, fresh: Option<&EngineSignature>) -> bool {
    match (stored, fresh) {
        (Some(stored), Some(fresh)) => stored.hash == fresh.hash,
        _ => true,
    }
}

/// Compare `manifest` against `model`, run by run.
#[must_use]
pub fn check_ratchet(
    manifest: &Manifest,
    model: &RatchetModel,
    engine_signatures: &BTreeMap<String, EngineSignature>,
    signature_policy: crate::config::SignaturePolicy,
) -> RatchetReport {
    let mut run_reports = Vec::new();
    let mut passed = true;

    for (run_id, budget) in &model.runs {
        let Some(run_summary) = manifest.runs.get(run_id) else {
            log::warn!("ratchet: run '{run_id}' is not present in the manifest; skipping check");
            continue;
        };

        let matches = signature_matches(&budget.engine_signature, engine_signatures.get(run_id));
        if !matches {
            log::warn!("ratchet: engine signature for run '{run_id}' does not match the ratchet");
        }

        let mut violations = Vec::new();
        let mut improvements = Vec::new();

        let files_by_path: BTreeMap<&str, &FileSummary> = run_summary.per_file.iter().map(|f| (f.path.as_str(), f)).collect();
        let mut paths: BTreeSet<&str> = budget.paths.keys().map(String::as_str).collect();
        paths.extend(files_by_path.keys());

        for path in paths {
            let allowed_map = budget.paths.get(path);
            let file = files_by_path.get(path).copied();
            for severity in &budget.severities {
                let allowed = allowed_map.and_then(|p| p.severities.get(severity)).copied().unwrap_or(0);
                let actual = file.map_or(0, |f| count_for_severity(f, *severity));
                if actual > allowed {
                    violations.push(Violation { run_id: run_id.clone(), path: path.to_owned(), severity: *severity, allowed, actual });
                } else if actual < allowed {
                    improvements.push(Improvement { run_id: run_id.clone(), path: path.to_owned(), severity: *severity, allowed, actual });
                }
            }
        }

        if !violations.is_empty() || (signature_policy == crate::config::SignaturePolicy::Fail && !matches) {
            passed = false;
        }

        run_reports.push(RunReport { run_id: run_id.clone(), severities: budget.severities.clone(), violations, improvements, signature_matches: matches });
    }

    RatchetReport { runs: run_reports, passed }
}

/// Tighten `model` to `manifest`'s current state: `allowed = max(target,
/// actual)` for every tracked path/severity, so the budget only ever moves
/// down toward `target`, never back up. Refreshes `engine_signature`.
#[must_use]
pub fn update_ratchet(
    manifest: &Manifest,
    model: &RatchetModel,
    global_target_overrides: &BTreeMap<Severity, i64>,
    scoped_target_overrides: &BTreeMap<String, BTreeMap<Severity, i64>>,
    engine_signatures: &BTreeMap<String, EngineSignature>,
    generated_at: DateTime<Utc>,
) -> RatchetModel {
    let mut runs = BTreeMap::new();

    for (run_id, budget) in &model.runs {
        let mut targets = budget.targets.clone();
        targets.extend(global_target_overrides.iter().map(|(s, v)| (*s, *v)));
        if let Some(scoped) = scoped_target_overrides.get(run_id) {
            targets.extend(scoped.iter().map(|(s, v)| (*s, *v)));
        }

        let paths = if let Some(run_summary) = manifest.runs.get(run_id) {
            run_summary
                .per_file
                .iter()
                .map(|file| {
                    let severities = budget
                        .severities
                        .iter()
                        .map(|severity| {
                            let target = clamp_nonneg(targets.get(severity).copied().unwrap_or(0)) as u64;
                            let actual = count_for_severity(file, *severity);
                            (*severity, target.max(actual))
                        })
                        .collect();
                    (file.path.clone(), PathBudget { severities })
                })
                .collect()
        } else {
            log::warn!("ratchet: run '{run_id}' is not present in the manifest during update; leaving its budget unchanged");
            budget.paths.clone()
        };

        let engine_signature = engine_signatures.get(run_id).cloned().or_else(|| budget.engine_signature.clone());
        runs.insert(run_id.clone(), RatchetRunBudget { severities: budget.severities.clone(), paths, targets, engine_signature });
    }

    RatchetModel { generated_at, manifest_path: model.manifest_path.clone(), project_root: model.project_root.clone(), runs }
}

/// Refresh only `engine_signature` for every run, leaving budgets and
/// targets untouched.
#[must_use]
pub fn rebaseline_ratchet(model: &RatchetModel, engine_signatures: &BTreeMap<String, EngineSignature>, generated_at: DateTime<Utc>) -> RatchetModel {
    let mut runs = model.runs.clone();
    for (run_id, budget) in &mut runs {
        if let Some(signature) = engine_signatures.get(run_id) {
            budget.engine_signature = Some(signature.clone());
        }
    }
    RatchetModel { generated_at, manifest_path: model.manifest_path.clone(), project_root: model.project_root.clone(), runs }
}

/// A read-only snapshot of a ratchet's resolved state, for `ratchet info`.
#[derive(Debug, Clone)]
pub struct RatchetSnapshot {
    pub manifest_path: Option<String>,
    pub project_root: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub runs: Vec<String>,
    pub severities: BTreeMap<String, Vec<Severity>>,
    pub targets: BTreeMap<String, BTreeMap<Severity, i64>>,
}

#[must_use]
pub fn describe_ratchet(model: &RatchetModel) -> RatchetSnapshot {
    RatchetSnapshot {
        manifest_path: model.manifest_path.clone(),
        project_root: model.project_root.clone(),
        generated_at: model.generated_at,
        runs: model.runs.keys().cloned().collect(),
        severities: model.runs.iter().map(|(k, v)| (k.clone(), v.severities.clone())).collect(),
        targets: model.runs.iter().map(|(k, v)| (k.clone(), v.targets.clone())).collect(),
    }
}

/// Load a ratchet file, if one exists at `path`.
///
/// # Errors
/// Returns [`RatchetrError::RatchetModelValidation`] if the file exists but
/// cannot be read or doesn't parse as a [`RatchetModel`].
pub fn load_ratchet_file(path: &Path) -> Result<Option<RatchetModel>, RatchetrError> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| RatchetrError::RatchetModelValidation { message: format!("failed to read ratchet file {}: {e}", path.display()) })?;
    let model: RatchetModel = serde_json::from_str(&content)
        .map_err(|e| RatchetrError::RatchetModelValidation { message: format!("malformed ratchet file {}: {e}", path.display()) })?;
    Ok(Some(model))
}

/// Persist `model` to `path` atomically (temp file + rename), under an
/// exclusive lock. Refuses to overwrite an existing file unless `force`.
///
/// # Errors
/// Returns [`RatchetrError::RatchetFileExists`] if `path` already exists and
/// `force` is `false`, or [`RatchetrError::RatchetModelValidation`] on any
/// I/O or serialization failure.
pub fn write_ratchet_file(path: &Path, model: &RatchetModel, force: bool) -> Result<(), RatchetrError> {
    if path.is_file() && !force {
        return Err(RatchetrError::RatchetFileExists { path: path.display().to_string() });
    }

    let _lock = ExclusiveLock::acquire(path)
        .map_err(|e| RatchetrError::RatchetModelValidation { message: format!("failed to lock ratchet file {}: {e}", path.display()) })?;

    let json = serde_json::to_string_pretty(model).map_err(|e| RatchetrError::RatchetModelValidation { message: e.to_string() })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| RatchetrError::RatchetModelValidation { message: format!("failed to create {}: {e}", parent.display()) })?;
    }

    let pid = std::process::id();
    let tmp_path = path.with_extension(format!("json.tmp.{pid}"));
    std::fs::write(&tmp_path, &json)
        .map_err(|e| RatchetrError::RatchetModelValidation { message: format!("failed to write {}: {e}", tmp_path.display()) })?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        RatchetrError::RatchetModelValidation { message: format!("failed to rename {} to {}: {e}", tmp_path.display(), path.display()) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignaturePolicy;
    use crate::manifest::{FileSummary, RunSummary};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn manifest_with_errors(run_id: &str, path: &str, errors: u64) -> Manifest {
        let file = FileSummary { path: path.to_owned(), errors, ..FileSummary::default() };
        let mut run = RunSummary::default();
        run.per_file.push(file);
        run.errors = errors;
        let mut runs = BTreeMap::new();
        runs.insert(run_id.to_owned(), run);
        Manifest { version: crate::manifest::MANIFEST_VERSION, generated_at: now(), runs, readiness: crate::manifest::Readiness::default() }
    }

    #[test]
    fn parse_target_entry_handles_global_and_scoped_keys() {
        let (run_id, severity, value) = parse_target_entry("errors=0").unwrap();
        assert_eq!(run_id, None);
        assert_eq!(severity, Severity::Error);
        assert_eq!(value, 0);

        let (run_id, severity, value) = parse_target_entry("pyright:current.warnings=5").unwrap();
        assert_eq!(run_id.as_deref(), Some("pyright:current"));
        assert_eq!(severity, Severity::Warning);
        assert_eq!(value, 5);
    }

    #[test]
    fn parse_target_entry_clamps_negative_values_and_rejects_blank_keys() {
        let (_, _, value) = parse_target_entry("errors=-3").unwrap();
        assert_eq!(value, 0);
        assert!(parse_target_entry("=3").is_err());
        assert!(parse_target_entry("no-equals-sign").is_err());
    }

    #[test]
    fn init_baselines_current_counts_as_the_allowance() {
        let manifest = manifest_with_errors("pyright:current", "src/foo.py", 1);
        let options = InitOptions { severities: vec![Severity::Error, Severity::Warning], ..Default::default() };
        let model = init_ratchet(&manifest, &options, now());

        let budget = &model.runs["pyright:current"];
        assert_eq!(budget.paths["src/foo.py"].severities[&Severity::Error], 1);
        assert_eq!(budget.paths["src/foo.py"].severities[&Severity::Warning], 0);
    }

    #[test]
    fn check_reports_a_violation_when_a_file_regresses() {
        let baseline = manifest_with_errors("pyright:current", "src/foo.py", 1);
        let options = InitOptions { severities: vec![Severity::Error], ..Default::default() };
        let model = init_ratchet(&baseline, &options, now());

        let regressed = manifest_with_errors("pyright:current", "src/foo.py", 2);
        let report = check_ratchet(&regressed, &model, &BTreeMap::new(), SignaturePolicy::Fail);

        assert!(!report.passed);
        let run = &report.runs[0];
        assert_eq!(run.violations.len(), 1);
        assert_eq!(run.violations[0], Violation { run_id: "pyright:current".to_owned(), path: "src/foo.py".to_owned(), severity: Severity::Error, allowed: 1, actual: 2 });
    }

    #[test]
    fn check_passes_when_nothing_regressed() {
        let baseline = manifest_with_errors("pyright:current", "src/foo.py", 1);
        let options = InitOptions { severities: vec![Severity::Error], ..Default::default() };
        let model = init_ratchet(&baseline, &options, now());

        let report = check_ratchet(&baseline, &model, &BTreeMap::new(), SignaturePolicy::Fail);
        assert!(report.passed);
        assert!(report.runs[0].violations.is_empty());
    }

    #[test]
    fn update_tightens_to_current_state_but_never_below_target() {
        let mut targets = BTreeMap::new();
        targets.insert(Severity::Error, 1);
        let mut paths = BTreeMap::new();
        let mut severities = BTreeMap::new();
        severities.insert(Severity::Error, 3);
        paths.insert("src/foo.py".to_owned(), PathBudget { severities });
        let mut runs = BTreeMap::new();
        runs.insert("pyright:current".to_owned(), RatchetRunBudget { severities: vec![Severity::Error], paths, targets, engine_signature: None });
        let model = RatchetModel { generated_at: now(), manifest_path: None, project_root: None, runs };

        let improved = manifest_with_errors("pyright:current", "src/foo.py", 2);
        let updated = update_ratchet(&improved, &model, &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new(), now());
        assert_eq!(updated.runs["pyright:current"].paths["src/foo.py"].severities[&Severity::Error], 2);

        let zeroed = manifest_with_errors("pyright:current", "src/foo.py", 0);
        let updated_again = update_ratchet(&zeroed, &updated, &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new(), now());
        assert_eq!(updated_again.runs["pyright:current"].paths["src/foo.py"].severities[&Severity::Error], 1);
    }

    #[test]
    fn rebaseline_refreshes_signature_without_touching_budgets() {
        let manifest = manifest_with_errors("pyright:current", "src/foo.py", 1);
        let options = InitOptions { severities: vec![Severity::Error], ..Default::default() };
        let model = init_ratchet(&manifest, &options, now());

        let mut signatures = BTreeMap::new();
        signatures.insert("pyright:current".to_owned(), compute_engine_signature("pyright", Mode::Current, &serde_json::json!({})));
        let rebaselined = rebaseline_ratchet(&model, &signatures, now());

        assert_eq!(rebaselined.runs["pyright:current"].paths, model.runs["pyright:current"].paths);
        assert!(rebaselined.runs["pyright:current"].engine_signature.is_some());
    }

    #[test]
    fn write_ratchet_file_refuses_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratchet.json");
        let model = RatchetModel { generated_at: now(), manifest_path: None, project_root: None, runs: BTreeMap::new() };

        write_ratchet_file(&path, &model, false).unwrap();
        let result = write_ratchet_file(&path, &model, false);
        assert!(matches!(result, Err(RatchetrError::RatchetFileExists { .. })));
        assert!(write_ratchet_file(&path, &model, true).is_ok());
    }

    #[test]
    fn load_ratchet_file_round_trips_through_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratchet.json");
        let model = RatchetModel { generated_at: now(), manifest_path: Some("manifest.json".to_owned()), project_root: None, runs: BTreeMap::new() };

        write_ratchet_file(&path, &model, false).unwrap();
        let loaded = load_ratchet_file(&path).unwrap().unwrap();
        assert_eq!(loaded.manifest_path, model.manifest_path);
    }

    #[test]
    fn load_ratchet_file_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_ratchet_file(&dir.path().join("missing.json")).unwrap().is_none());
    }
}
