//! Manifest Aggregator — component F.
//!
//! Folds a set of [`crate::orchestrator::EngineResult`]s into per-run,
//! per-file, per-folder, per-rule, and per-category rollups, then computes
//! folder-level typing readiness buckets on top of those rollups.

pub mod validate;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestrator::EngineResult;
use crate::types::{Diagnostic, RunId, Severity};

/// Current manifest schema version. Bumped on any breaking shape change.
pub const MANIFEST_VERSION: u32 = 1;

/// `unknownChecks`/`optionalChecks`/`unusedSymbols`/`general` close thresholds.
/// A category with `0 < count <= threshold` is "close"; above it, "blocked".
pub const CATEGORY_CLOSE_THRESHOLD: &[(&str, u64)] =
    &[("unknownChecks", 2), ("optionalChecks", 2), ("unusedSymbols", 4), ("general", 5)];

/// Folder-level strict-mode close threshold: total diagnostics at or below
/// this, with no blocked non-general category, is "close" rather than
/// "blocked".
pub const STRICT_CLOSE_THRESHOLD: u64 = 3;

fn close_threshold(category: &str) -> u64 {
    CATEGORY_CLOSE_THRESHOLD
        .iter()
        .find(|(name, _)| *name == category)
        .map_or(3, |(_, threshold)| *threshold)
}

/// Human label used in a folder's `recommendations`, e.g. "resolve 3
/// unknown-type issues".
fn category_label(category: &str) -> &'static str {
    match category {
        "unknownChecks" => "unknown-type",
        "optionalChecks" => "optional-check",
        "unusedSymbols" => "unused-symbol",
        _ => "general",
    }
}

/// A single diagnostic carried verbatim on a [`FileSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiagnostic {
    pub severity: Severity,
    pub line: u32,
    pub column: u32,
    pub code: Option<String>,
    pub message: String,
}

impl From<&Diagnostic> for FileDiagnostic {
    fn from(diagnostic: &Diagnostic) -> Self {
        Self {
            severity: diagnostic.severity,
            line: diagnostic.line,
            column: diagnostic.column,
            code: diagnostic.code.clone(),
            message: diagnostic.message.clone(),
        }
    }
}

/// Per-file rollup, plus the verbatim diagnostics that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub path: String,
    pub errors: u64,
    pub warnings: u64,
    pub information: u64,
    pub rule_counts: BTreeMap<String, u64>,
    pub category_counts: BTreeMap<String, u64>,
    pub diagnostics: Vec<FileDiagnostic>,
}

/// Per-folder rollup. One record is emitted for every ancestor folder of a
/// diagnostic's path, up to `max_depth` (spec §4.F), not just the immediate
/// parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderSummary {
    pub path: String,
    pub depth: u32,
    pub errors: u64,
    pub warnings: u64,
    pub information: u64,
    pub rule_counts: BTreeMap<String, u64>,
    pub category_counts: BTreeMap<String, u64>,
    /// Derived once folding completes: `["strict-ready"]` when the folder
    /// has zero diagnostics, else one entry per category that has crossed
    /// its close threshold.
    pub recommendations: Vec<String>,
}

/// One (tool, mode) run's full rollup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub errors: u64,
    pub warnings: u64,
    pub information: u64,
    pub rule_counts: BTreeMap<String, u64>,
    pub category_counts: BTreeMap<String, u64>,
    /// Sorted by `(-errors, -warnings, path)`.
    pub per_file: Vec<FileSummary>,
    /// Grouped by ascending `depth`, each depth sorted by
    /// `(-errors, -warnings, path)`.
    pub per_folder: Vec<FolderSummary>,
    pub cached: bool,
}

/// The aggregated manifest: every run folded into its rollups, plus the
/// readiness buckets computed from the folder rollups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub runs: BTreeMap<String, RunSummary>,
    pub readiness: Readiness,
}

impl Manifest {
    #[must_use]
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Every ancestor folder of `path`, depth-bounded by `max_depth`, matching
/// the ground-truth `summarise_run` loop: path segments are taken from the
/// POSIX-split `path` (the final segment is the file name itself), and one
/// folder string is emitted per depth `1..=min(segment_count, max_depth)`.
/// For a shallow path whose segment count doesn't exceed `max_depth`, the
/// deepest "folder" emitted is the path itself — this is a faithful quirk
/// of the original aggregator, not a special case to avoid.
fn folder_ancestors(path: &str, max_depth: usize) -> Vec<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Vec::new();
    }
    let limit = segments.len().min(max_depth.max(1));
    (1..=limit).map(|depth| segments[..depth].join("/")).collect()
}

fn categorize(code: Option<&str>, category_mapping: &BTreeMap<String, Vec<String>>) -> String {
    let Some(code) = code else {
        return "general".to_owned();
    };
    let lowered = code.to_ascii_lowercase();
    for (category, patterns) in category_mapping {
        if patterns.iter().any(|p| lowered.contains(&p.to_ascii_lowercase())) {
            return category.clone();
        }
    }
    "general".to_owned()
}

fn bump(counts: &mut BTreeMap<String, u64>, key: &str) {
    *counts.entry(key.to_owned()).or_insert(0) += 1;
}

/// Mutable fold state kept while walking a run's diagnostics; converted
/// into sorted `Vec`s only once folding finishes.
#[derive(Default)]
struct FoldAccumulator {
    errors: u64,
    warnings: u64,
    information: u64,
    rule_counts: BTreeMap<String, u64>,
    category_counts: BTreeMap<String, u64>,
    per_file: BTreeMap<String, FileSummary>,
    per_folder: BTreeMap<String, FolderSummary>,
}

fn fold_diagnostic(diagnostic: &Diagnostic, category_mapping: &BTreeMap<String, Vec<String>>, max_depth: usize, acc: &mut FoldAccumulator) {
    match diagnostic.severity {
        Severity::Error => acc.errors += 1,
        Severity::Warning => acc.warnings += 1,
        Severity::Information => acc.information += 1,
    }
    if let Some(code) = &diagnostic.code {
        bump(&mut acc.rule_counts, code);
    }
    let category = categorize(diagnostic.code.as_deref(), category_mapping);
    bump(&mut acc.category_counts, &category);

    let file = acc.per_file.entry(diagnostic.path.clone()).or_insert_with(|| FileSummary {
        path: diagnostic.path.clone(),
        ..FileSummary::default()
    });
    match diagnostic.severity {
        Severity::Error => file.errors += 1,
        Severity::Warning => file.warnings += 1,
        Severity::Information => file.information += 1,
    }
    if let Some(code) = &diagnostic.code {
        bump(&mut file.rule_counts, code);
    }
    bump(&mut file.category_counts, &category);
    file.diagnostics.push(FileDiagnostic::from(diagnostic));

    for (depth, folder) in folder_ancestors(&diagnostic.path, max_depth).into_iter().enumerate() {
        let folder_summary = acc.per_folder.entry(folder.clone()).or_insert_with(|| FolderSummary {
            path: folder,
            depth: (depth + 1) as u32,
            ..FolderSummary::default()
        });
        match diagnostic.severity {
            Severity::Error => folder_summary.errors += 1,
            Severity::Warning => folder_summary.warnings += 1,
            Severity::Information => folder_summary.information += 1,
        }
        if let Some(code) = &diagnostic.code {
            bump(&mut folder_summary.rule_counts, code);
        }
        bump(&mut folder_summary.category_counts, &category);
    }
}

fn by_errors_warnings_path(errors_a: u64, warnings_a: u64, path_a: &str, errors_b: u64, warnings_b: u64, path_b: &str) -> Ordering {
    errors_b.cmp(&errors_a).then(warnings_b.cmp(&warnings_a)).then(path_a.cmp(path_b))
}

fn folder_recommendations(folder: &FolderSummary) -> Vec<String> {
    let total = folder.errors + folder.warnings + folder.information;
    if total == 0 {
        return vec!["strict-ready".to_owned()];
    }
    CATEGORIES
        .iter()
        .filter(|category| **category != "general")
        .filter_map(|category| {
            let count = *folder.category_counts.get(*category).unwrap_or(&0);
            (count > close_threshold(category)).then(|| format!("resolve {count} {} issues", category_label(category)))
        })
        .collect()
}

/// Fold one engine result into a [`RunSummary`]. `max_depth` bounds how many
/// ancestor folders each diagnostic's path rolls up into (spec §4.F/§6,
/// `AuditConfig::max_depth`).
#[must_use]
pub fn fold_engine_result(result: &EngineResult, category_mapping: &BTreeMap<String, Vec<String>>, max_depth: usize) -> RunSummary {
    let mut acc = FoldAccumulator::default();
    for diagnostic in &result.diagnostics {
        fold_diagnostic(diagnostic, category_mapping, max_depth, &mut acc);
    }

    let mut per_file: Vec<FileSummary> = acc.per_file.into_values().collect();
    per_file.sort_by(|a, b| by_errors_warnings_path(a.errors, a.warnings, &a.path, b.errors, b.warnings, &b.path));

    let mut per_folder: Vec<FolderSummary> = acc
        .per_folder
        .into_values()
        .map(|mut folder| {
            folder.recommendations = folder_recommendations(&folder);
            folder
        })
        .collect();
    per_folder.sort_by(|a, b| {
        a.depth
            .cmp(&b.depth)
            .then(by_errors_warnings_path(a.errors, a.warnings, &a.path, b.errors, b.warnings, &b.path))
    });

    RunSummary {
        errors: acc.errors,
        warnings: acc.warnings,
        information: acc.information,
        rule_counts: acc.rule_counts,
        category_counts: acc.category_counts,
        per_file,
        per_folder,
        cached: result.cached,
    }
}

/// Build the full manifest from a set of `(RunId, EngineResult, category
/// mapping)` triples. `max_depth` comes from `AuditConfig::max_depth`
/// (spec §6, default 3) and bounds folder rollup depth for every run.
#[must_use]
pub fn build_manifest(
    results: &[(RunId, EngineResult, BTreeMap<String, Vec<String>>)],
    max_depth: usize,
    generated_at: DateTime<Utc>,
) -> Manifest {
    let mut runs = BTreeMap::new();
    for (run_id, result, category_mapping) in results {
        runs.insert(run_id.as_str().to_owned(), fold_engine_result(result, category_mapping, max_depth));
    }
    let readiness = compute_readiness(&runs);
    Manifest { version: MANIFEST_VERSION, generated_at, runs, readiness }
}

/// One category's readiness status for one folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessStatus {
    Ready,
    Close,
    Blocked,
}

/// One folder's readiness entry under one bucket (category or strict).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessEntry {
    pub path: String,
    pub count: u64,
    pub errors: u64,
    pub warnings: u64,
}

/// One category's ready/close/blocked buckets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryReadiness {
    pub ready: Vec<ReadinessEntry>,
    pub close: Vec<ReadinessEntry>,
    pub blocked: Vec<ReadinessEntry>,
    pub threshold: u64,
}

/// One folder's strict-readiness entry (category breakdown plus notes when
/// the folder is merely "close").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrictEntry {
    pub path: String,
    pub errors: u64,
    pub warnings: u64,
    pub information: u64,
    pub diagnostics: u64,
    pub categories: BTreeMap<String, u64>,
    pub category_status: BTreeMap<String, ReadinessStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrictReadiness {
    pub ready: Vec<StrictEntry>,
    pub close: Vec<StrictEntry>,
    pub blocked: Vec<StrictEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Readiness {
    pub strict: StrictReadiness,
    pub options: BTreeMap<String, CategoryReadiness>,
}

const CATEGORIES: &[&str] = &["unknownChecks", "optionalChecks", "unusedSymbols", "general"];

fn status_for(category: &str, count: u64) -> ReadinessStatus {
    if count == 0 {
        return ReadinessStatus::Ready;
    }
    if count <= close_threshold(category) {
        ReadinessStatus::Close
    } else {
        ReadinessStatus::Blocked
    }
}

/// Folder totals merged across every run, used only to compute readiness —
/// unlike [`FolderSummary`] this carries no `depth`/`recommendations`,
/// since those are per-run fold artifacts, not readiness inputs.
#[derive(Default)]
struct FolderRollup {
    errors: u64,
    warnings: u64,
    information: u64,
    category_counts: BTreeMap<String, u64>,
}

/// Compute folder-level readiness across every run's folder rollups,
/// aggregated per folder across all runs (a folder blocked by either
/// pyright or mypy is blocked overall). Every ancestor-folder depth
/// produced by folding is treated as its own readiness subject.
#[must_use]
pub fn compute_readiness(runs: &BTreeMap<String, RunSummary>) -> Readiness {
    let mut merged: BTreeMap<String, FolderRollup> = BTreeMap::new();
    for run in runs.values() {
        for folder in &run.per_folder {
            let entry = merged.entry(folder.path.clone()).or_default();
            entry.errors += folder.errors;
            entry.warnings += folder.warnings;
            entry.information += folder.information;
            for (category, count) in &folder.category_counts {
                *entry.category_counts.entry(category.clone()).or_insert(0) += count;
            }
        }
    }

    let mut options: BTreeMap<String, CategoryReadiness> = CATEGORIES
        .iter()
        .map(|c| ((*c).to_owned(), CategoryReadiness { threshold: close_threshold(c), ..Default::default() }))
        .collect();
    let mut strict = StrictReadiness::default();

    for (path, folder) in &merged {
        let mut category_status: BTreeMap<String, (ReadinessStatus, u64)> = BTreeMap::new();
        for category in CATEGORIES {
            let count = *folder.category_counts.get(*category).unwrap_or(&0);
            let status = status_for(category, count);
            category_status.insert((*category).to_owned(), (status, count));
            let bucket = options.get_mut(*category).expect("category seeded above");
            let entry = ReadinessEntry { path: path.clone(), count, errors: folder.errors, warnings: folder.warnings };
            match status {
                ReadinessStatus::Ready => bucket.ready.push(entry),
                ReadinessStatus::Close => bucket.close.push(entry),
                ReadinessStatus::Blocked => bucket.blocked.push(entry),
            }
        }

        let total_diagnostics = folder.errors + folder.warnings;
        let blocking_non_general = category_status
            .iter()
            .any(|(cat, (status, _))| *status == ReadinessStatus::Blocked && cat != "general");
        let strict_status = if total_diagnostics == 0 {
            ReadinessStatus::Ready
        } else if total_diagnostics <= STRICT_CLOSE_THRESHOLD && !blocking_non_general {
            ReadinessStatus::Close
        } else {
            ReadinessStatus::Blocked
        };

        let notes = if strict_status == ReadinessStatus::Close {
            let blockers: Vec<String> = category_status
                .iter()
                .filter(|(_, (status, _))| *status != ReadinessStatus::Ready)
                .map(|(cat, (_, count))| format!("{cat}: {count}"))
                .collect();
            if blockers.is_empty() { None } else { Some(blockers) }
        } else {
            None
        };

        let entry = StrictEntry {
            path: path.clone(),
            errors: folder.errors,
            warnings: folder.warnings,
            information: folder.information,
            diagnostics: total_diagnostics,
            categories: category_status.iter().map(|(cat, (_, count))| (cat.clone(), *count)).collect(),
            category_status: category_status.into_iter().map(|(cat, (status, _))| (cat, status)).collect(),
            notes,
        };

        match strict_status {
            ReadinessStatus::Ready => strict.ready.push(entry),
            ReadinessStatus::Close => strict.close.push(entry),
            ReadinessStatus::Blocked => strict.blocked.push(entry),
        }
    }

    Readiness { strict, options }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EngineName, Mode, ToolName};

    fn diag(path: &str, severity: Severity, code: Option<&str>) -> Diagnostic {
        Diagnostic {
            tool: ToolName::new("pyright").unwrap(),
            severity,
            path: path.to_owned(),
            line: 1,
            column: 1,
            code: code.map(str::to_owned),
            message: "boom".to_owned(),
            raw: serde_json::Value::Null,
        }
    }

    fn result(diagnostics: Vec<Diagnostic>) -> EngineResult {
        EngineResult {
            engine: EngineName::new("pyright").unwrap(),
            mode: Mode::Current,
            argv: vec!["pyright".to_owned()],
            exit_code: 0,
            duration_ms: 1,
            diagnostics,
            tool_summary: None,
            cached: false,
        }
    }

    fn mapping() -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([("unknownChecks".to_owned(), vec!["reportUnknown".to_owned()])])
    }

    fn file<'a>(run: &'a RunSummary, path: &str) -> &'a FileSummary {
        run.per_file.iter().find(|f| f.path == path).unwrap()
    }

    fn folder<'a>(run: &'a RunSummary, path: &str) -> Option<&'a FolderSummary> {
        run.per_folder.iter().find(|f| f.path == path)
    }

    #[test]
    fn folds_severity_counts_per_file() {
        let r = result(vec![
            diag("src/a.py", Severity::Error, Some("reportUnknownMemberType")),
            diag("src/a.py", Severity::Warning, None),
        ]);
        let run = fold_engine_result(&r, &mapping(), 3);
        assert_eq!(run.errors, 1);
        assert_eq!(run.warnings, 1);
        let f = file(&run, "src/a.py");
        assert_eq!(f.errors, 1);
        assert_eq!(f.warnings, 1);
        assert_eq!(f.diagnostics.len(), 2);
    }

    #[test]
    fn per_folder_emits_every_ancestor_up_to_max_depth() {
        let r = result(vec![diag("src/pkg/sub/a.py", Severity::Error, None)]);
        let run = fold_engine_result(&r, &mapping(), 3);
        assert!(folder(&run, "src").is_some());
        assert!(folder(&run, "src/pkg").is_some());
        assert!(folder(&run, "src/pkg/sub").is_some());
        // max_depth=3 caps the walk before the file-name segment itself.
        assert!(folder(&run, "src/pkg/sub/a.py").is_none());
    }

    #[test]
    fn per_folder_respects_max_depth() {
        let r = result(vec![diag("src/pkg/sub/a.py", Severity::Error, None)]);
        let run = fold_engine_result(&r, &mapping(), 1);
        assert!(folder(&run, "src").is_some());
        assert!(folder(&run, "src/pkg").is_none());
    }

    #[test]
    fn per_file_and_per_folder_are_sorted_by_errors_then_warnings_then_path() {
        let r = result(vec![
            diag("src/a.py", Severity::Warning, None),
            diag("src/b.py", Severity::Error, None),
            diag("src/b.py", Severity::Error, None),
        ]);
        let run = fold_engine_result(&r, &mapping(), 3);
        let paths: Vec<&str> = run.per_file.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/b.py", "src/a.py"]);
    }

    #[test]
    fn folder_recommends_strict_ready_with_zero_diagnostics() {
        let folder = FolderSummary::default();
        assert_eq!(folder_recommendations(&folder), vec!["strict-ready".to_owned()]);
    }

    #[test]
    fn folder_recommends_resolving_a_category_past_threshold() {
        let mut folder = FolderSummary { errors: 3, ..FolderSummary::default() };
        folder.category_counts.insert("unknownChecks".to_owned(), 3);
        let recs = folder_recommendations(&folder);
        assert!(recs.iter().any(|r| r.contains("unknown-type")));
    }

    #[test]
    fn category_falls_back_to_general_without_a_match() {
        let r = result(vec![diag("a.py", Severity::Error, Some("totally-unmapped"))]);
        let run = fold_engine_result(&r, &mapping(), 3);
        assert_eq!(*run.category_counts.get("general").unwrap(), 1);
    }

    #[test]
    fn folder_with_zero_diagnostics_is_ready_in_every_bucket() {
        let mut runs = BTreeMap::new();
        runs.insert("pyright:current".to_owned(), RunSummary::default());
        let readiness = compute_readiness(&runs);
        assert!(readiness.strict.ready.is_empty() && readiness.strict.close.is_empty() && readiness.strict.blocked.is_empty());
    }

    #[test]
    fn folder_blocked_when_category_exceeds_threshold() {
        let r = result((0..3).map(|_| diag("src/a.py", Severity::Error, Some("reportUnknownMemberType"))).collect());
        let run = fold_engine_result(&r, &mapping(), 3);
        let mut runs = BTreeMap::new();
        runs.insert("pyright:current".to_owned(), run);
        let readiness = compute_readiness(&runs);
        let unknown = &readiness.options["unknownChecks"];
        assert_eq!(unknown.blocked.len(), 1);
        assert!(readiness.strict.blocked.iter().any(|e| e.path == "src"));
    }

    #[test]
    fn strict_close_includes_notes_listing_blockers() {
        let r = result(vec![diag("src/a.py", Severity::Error, Some("reportUnknownMemberType"))]);
        let run = fold_engine_result(&r, &mapping(), 3);
        let mut runs = BTreeMap::new();
        runs.insert("pyright:current".to_owned(), run);
        let readiness = compute_readiness(&runs);
        let close_entry = readiness.strict.close.iter().find(|e| e.path == "src").unwrap();
        assert!(close_entry.notes.is_some());
    }
}
