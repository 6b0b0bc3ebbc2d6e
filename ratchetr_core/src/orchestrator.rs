//! Engine Orchestrator — component D.
//!
//! Single-threaded cooperative dispatcher: each (engine, mode) pair runs to
//! completion before the next begins. Subprocess execution never goes
//! through a shell; the first argv element must be in the caller-supplied
//! allow-list.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::RatchetrError;
use crate::plan::{BaseEngine, EnginePlan};
use crate::types::{Diagnostic, EngineName, Mode, ToolName};

/// Per-run outcome of one (engine, mode) invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResult {
    pub engine: EngineName,
    pub mode: Mode,
    pub argv: Vec<String>,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub diagnostics: Vec<Diagnostic>,
    pub tool_summary: Option<ToolSummary>,
    pub cached: bool,
}

/// Tool-reported totals, compared against parsed totals for a sanity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub errors: u64,
    pub warnings: u64,
    pub information: u64,
}

/// Execute `argv` under the allow-list, never through a shell. Returns
/// `(exit_code, stdout, stderr, duration_ms)`.
///
/// # Errors
/// Returns [`RatchetrError::SubprocessInvocation`] if `argv` is empty or its
/// first element is not in `allowed`.
pub fn run_allowed_subprocess(
    argv: &[String],
    cwd: &Path,
    allowed: &HashSet<String>,
) -> Result<(i32, String, String, u64), RatchetrError> {
    let Some(executable) = argv.first() else {
        return Err(RatchetrError::SubprocessInvocation {
            executable: String::new(),
        });
    };
    if argv.iter().any(|arg| arg.is_empty()) || !allowed.contains(executable.as_str()) {
        return Err(RatchetrError::SubprocessInvocation {
            executable: executable.clone(),
        });
    }

    let started = Instant::now();
    let output = Command::new(executable)
        .args(&argv[1..])
        .current_dir(cwd)
        .output()
        .map_err(|_| RatchetrError::SubprocessInvocation {
            executable: executable.clone(),
        })?;
    let duration_ms = started.elapsed().as_millis() as u64;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let exit_code = output.status.code().unwrap_or(-1);

    if exit_code < 0 {
        log::warn!("orchestrator: subprocess for {executable} exited without a status code");
    }

    Ok((exit_code, stdout, stderr, duration_ms))
}

/// Normalise an absolute diagnostic path to repo-relative POSIX form,
/// falling back to the absolute path when resolution lands outside
/// `repo_root` (spec §4.D step 6).
#[must_use]
pub fn normalise_diagnostic_path(repo_root: &Path, absolute: &Path) -> String {
    match absolute.strip_prefix(repo_root) {
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => absolute.to_string_lossy().replace('\\', "/"),
    }
}

/// Sort diagnostics by `(path, line, column)`, the stable ordering required
/// by spec §5.
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
}

/// Validate the coarse invariants spec §4.D step 7 calls out — violations
/// are logged, not raised; the result is still returned.
pub fn validate_result_invariants(result: &EngineResult) {
    if result.argv.is_empty() {
        log::warn!("orchestrator: engine {} produced an empty argv", result.engine.as_str());
    }
    if result.exit_code < 0 {
        log::warn!("orchestrator: engine {} returned a negative exit code", result.engine.as_str());
    }
}

/// Run one (engine, mode) pair end to end: resolve scope, check the cache,
/// dispatch on miss, store on miss, and return the result. Cache lookup and
/// storage are the caller's responsibility (component E) — this function is
/// the pure "miss path" the caller invokes after a cache miss.
///
/// # Errors
/// Propagates subprocess-invocation and output-parse failures.
pub fn dispatch(
    engine: &dyn BaseEngine,
    repo_root: &Path,
    plan: &EnginePlan,
) -> Result<EngineResult, RatchetrError> {
    let context = crate::plan::EngineRunContext {
        repo_root,
        mode: plan.mode,
        options: &plan.options,
    };
    let mut result = engine.run(&context, &plan.resolved_scope)?;
    validate_result_invariants(&result);
    sort_diagnostics(&mut result.diagnostics);
    Ok(result)
}

/// Fixed mode iteration order within one engine: `current` then `target`
/// (spec §5 ordering guarantees).
pub const MODE_ORDER: [Mode; 2] = [Mode::Current, Mode::Target];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_argv() {
        let allowed: HashSet<String> = HashSet::new();
        let result = run_allowed_subprocess(&[], Path::new("."), &allowed);
        assert!(matches!(result, Err(RatchetrError::SubprocessInvocation { .. })));
    }

    #[test]
    fn rejects_executable_not_in_allow_list() {
        let allowed: HashSet<String> = ["mypy".to_owned()].into_iter().collect();
        let argv = vec!["rm".to_owned(), "-rf".to_owned(), "/".to_owned()];
        let result = run_allowed_subprocess(&argv, Path::new("."), &allowed);
        assert!(matches!(result, Err(RatchetrError::SubprocessInvocation { .. })));
    }

    #[test]
    fn allows_executable_in_allow_list() {
        let allowed: HashSet<String> = ["true".to_owned()].into_iter().collect();
        let argv = vec!["true".to_owned()];
        let result = run_allowed_subprocess(&argv, Path::new("."), &allowed);
        assert!(result.is_ok());
    }

    #[test]
    fn normalise_diagnostic_path_falls_back_to_absolute_outside_root() {
        let repo_root = Path::new("/repo");
        let inside = Path::new("/repo/src/a.py");
        assert_eq!(normalise_diagnostic_path(repo_root, inside), "src/a.py");

        let outside = Path::new("/elsewhere/a.py");
        assert_eq!(normalise_diagnostic_path(repo_root, outside), "/elsewhere/a.py");
    }

    #[test]
    fn sort_diagnostics_orders_by_path_line_column() {
        let mut diagnostics = vec![
            Diagnostic {
                tool: ToolName::new("mypy").unwrap(),
                severity: crate::types::Severity::Error,
                path: "b.py".to_owned(),
                line: 1,
                column: 1,
                code: None,
                message: String::new(),
                raw: serde_json::Value::Null,
            },
            Diagnostic {
                tool: ToolName::new("mypy").unwrap(),
                severity: crate::types::Severity::Error,
                path: "a.py".to_owned(),
                line: 5,
                column: 1,
                code: None,
                message: String::new(),
                raw: serde_json::Value::Null,
            },
        ];
        sort_diagnostics(&mut diagnostics);
        assert_eq!(diagnostics[0].path, "a.py");
        assert_eq!(diagnostics[1].path, "b.py");
    }
}
