//! Mypy engine: module invocation, `--show-error-codes` line parsing.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::RatchetrError;
use crate::orchestrator::{normalise_diagnostic_path, run_allowed_subprocess, EngineResult};
use crate::plan::{BaseEngine, EngineRunContext};
use crate::types::{Diagnostic, Severity, ToolName};

pub struct MypyEngine;

fn allowed() -> HashSet<String> {
    ["mypy".to_owned()].into_iter().collect()
}

fn mypy_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?P<path>.+?):(?P<line>\d+):(?:(?P<column>\d+):)? (?P<severity>error|note|warning): (?P<message>.*?)(?: \[(?P<code>[^\]]+)\])?$",
        )
        .expect("static mypy line pattern is valid")
    })
}

impl MypyEngine {
    fn config_file(context: &EngineRunContext<'_>) -> Option<String> {
        if let Some(config) = &context.options.config_file {
            return Some(config.clone());
        }
        let candidate = context.repo_root.join("mypy.ini");
        if candidate.exists() {
            Some(candidate.display().to_string())
        } else {
            None
        }
    }

    fn build_argv(context: &EngineRunContext<'_>, paths: &[String]) -> Vec<String> {
        let mut argv = vec!["mypy".to_owned()];
        if let Some(config) = Self::config_file(context) {
            argv.push("--config-file".to_owned());
            argv.push(config);
        }
        argv.push("--hide-error-context".to_owned());
        argv.push("--no-error-summary".to_owned());
        argv.push("--show-error-codes".to_owned());
        argv.push("--no-pretty".to_owned());
        argv.extend(context.options.plugin_args.iter().cloned());
        argv.extend(paths.iter().cloned());
        argv
    }
}

impl BaseEngine for MypyEngine {
    fn name(&self) -> &'static str {
        "mypy"
    }

    fn run(&self, context: &EngineRunContext<'_>, paths: &[String]) -> Result<EngineResult, RatchetrError> {
        let argv = Self::build_argv(context, paths);
        let (exit_code, stdout, stderr, duration_ms) = run_allowed_subprocess(&argv, context.repo_root, &allowed())?;

        let tool = ToolName::new("mypy").expect("literal is non-empty");
        let mut diagnostics = Vec::new();

        let remaining_stderr = stderr.trim();
        if !remaining_stderr.is_empty() {
            diagnostics.push(Diagnostic {
                tool: tool.clone(),
                severity: Severity::Error,
                path: "<stderr>".to_owned(),
                line: 0,
                column: 0,
                code: None,
                message: remaining_stderr.to_owned(),
                raw: serde_json::json!({"stderr": remaining_stderr}),
            });
        }

        let pattern = mypy_line_pattern();
        for raw_line in stdout.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with("Found ") || line.starts_with("Success:") {
                continue;
            }
            let Some(captures) = pattern.captures(line) else {
                diagnostics.push(Diagnostic {
                    tool: tool.clone(),
                    severity: Severity::Error,
                    path: "<parse-error>".to_owned(),
                    line: 0,
                    column: 0,
                    code: None,
                    message: line.to_owned(),
                    raw: serde_json::json!({"unparsed": line}),
                });
                continue;
            };

            let raw_path = &captures["path"];
            let path_buf = std::path::Path::new(raw_path);
            let path = if path_buf.is_absolute() {
                normalise_diagnostic_path(context.repo_root, path_buf)
            } else {
                normalise_diagnostic_path(context.repo_root, &context.repo_root.join(path_buf))
            };
            let line_num: u32 = captures["line"].parse().unwrap_or(0);
            let column: u32 = captures.name("column").and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            let severity = Severity::coerce(&captures["severity"]);
            let code = captures.name("code").map(|m| m.as_str().to_owned());
            let message = captures["message"].trim().to_owned();

            diagnostics.push(Diagnostic {
                tool: tool.clone(),
                severity,
                path,
                line: line_num,
                column,
                code,
                message,
                raw: serde_json::json!({
                    "path": raw_path,
                    "line": &captures["line"],
                }),
            });
        }

        Ok(EngineResult {
            engine: crate::types::EngineName::new("mypy").expect("literal is non-empty"),
            mode: context.mode,
            argv,
            exit_code,
            duration_ms,
            diagnostics,
            tool_summary: None,
            cached: false,
        })
    }

    fn category_mapping(&self) -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([
            (
                "unknownChecks".to_owned(),
                vec![
                    "name-defined".to_owned(),
                    "var-annotated".to_owned(),
                    "assignment".to_owned(),
                    "arg-type".to_owned(),
                    "call-arg".to_owned(),
                    "override".to_owned(),
                    "return-value".to_owned(),
                    "index".to_owned(),
                ],
            ),
            (
                "optionalChecks".to_owned(),
                vec!["union-attr".to_owned(), "none".to_owned(), "possibly-unbound".to_owned()],
            ),
            ("unusedSymbols".to_owned(), vec!["unused-".to_owned()]),
        ])
    }

    fn fingerprint_targets(&self, context: &EngineRunContext<'_>, _paths: &[String]) -> Vec<String> {
        Self::config_file(context).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::EngineOptions;
    use crate::types::Mode;

    fn context<'a>(repo_root: &'a std::path::Path, options: &'a EngineOptions) -> EngineRunContext<'a> {
        EngineRunContext { repo_root, mode: Mode::Current, options }
    }

    #[test]
    fn build_argv_includes_standard_flags() {
        let dir = tempfile::tempdir().unwrap();
        let options = EngineOptions::default();
        let argv = MypyEngine::build_argv(&context(dir.path(), &options), &["src".to_owned()]);
        assert!(argv.contains(&"--show-error-codes".to_owned()));
        assert!(argv.contains(&"src".to_owned()));
    }

    #[test]
    fn mypy_line_pattern_parses_full_diagnostic() {
        let pattern = mypy_line_pattern();
        let caps = pattern
            .captures("src/a.py:12:5: error: Incompatible types [assignment]")
            .unwrap();
        assert_eq!(&caps["path"], "src/a.py");
        assert_eq!(&caps["line"], "12");
        assert_eq!(caps.name("column").unwrap().as_str(), "5");
        assert_eq!(&caps["severity"], "error");
        assert_eq!(&caps["code"], "assignment");
    }

    #[test]
    fn mypy_line_pattern_parses_diagnostic_without_column_or_code() {
        let pattern = mypy_line_pattern();
        let caps = pattern.captures("src/a.py:12: note: Revealed type").unwrap();
        assert_eq!(&caps["path"], "src/a.py");
        assert!(caps.name("column").is_none());
        assert!(caps.name("code").is_none());
    }
}
