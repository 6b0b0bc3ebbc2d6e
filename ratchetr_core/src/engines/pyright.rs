//! Pyright engine: `--outputjson` invocation and `generalDiagnostics` parsing.

use std::collections::{BTreeMap, HashSet};

use crate::error::RatchetrError;
use crate::orchestrator::{normalise_diagnostic_path, run_allowed_subprocess, EngineResult, ToolSummary};
use crate::plan::{BaseEngine, EngineRunContext};
use crate::types::{Diagnostic, Mode, Severity, ToolName};

pub struct PyrightEngine;

fn allowed() -> HashSet<String> {
    ["pyright".to_owned()].into_iter().collect()
}

impl PyrightEngine {
    fn build_argv(context: &EngineRunContext<'_>, paths: &[String]) -> Vec<String> {
        let mut argv = vec!["pyright".to_owned(), "--outputjson".to_owned()];
        let default_config = context.repo_root.join("pyrightconfig.json");
        let plugin_args = &context.options.plugin_args;

        match context.mode {
            Mode::Current => {
                if let Some(config) = &context.options.config_file {
                    argv.push("--project".to_owned());
                    argv.push(config.clone());
                } else if default_config.exists() {
                    argv.push("--project".to_owned());
                    argv.push(default_config.display().to_string());
                } else {
                    argv.push(context.repo_root.display().to_string());
                }
                argv.extend(plugin_args.iter().cloned());
            }
            Mode::Target => {
                if let Some(config) = &context.options.config_file {
                    argv.push("--project".to_owned());
                    argv.push(config.clone());
                }
                argv.extend(plugin_args.iter().cloned());
                if paths.is_empty() {
                    argv.push(context.repo_root.display().to_string());
                } else {
                    argv.extend(paths.iter().cloned());
                }
            }
        }
        argv
    }
}

impl BaseEngine for PyrightEngine {
    fn name(&self) -> &'static str {
        "pyright"
    }

    fn run(&self, context: &EngineRunContext<'_>, paths: &[String]) -> Result<EngineResult, RatchetrError> {
        let argv = Self::build_argv(context, paths);
        let (exit_code, stdout, stderr, duration_ms) = run_allowed_subprocess(&argv, context.repo_root, &allowed())?;

        let payload_str = if stdout.trim().is_empty() { &stderr } else { &stdout };
        let payload: serde_json::Value = serde_json::from_str(payload_str).map_err(|e| RatchetrError::EngineOutputParse {
            tool: "pyright".to_owned(),
            message: e.to_string(),
        })?;

        let tool = ToolName::new("pyright").expect("literal is non-empty");
        let mut diagnostics = Vec::new();
        for item in payload.get("generalDiagnostics").and_then(|v| v.as_array()).into_iter().flatten() {
            let Some(file_path) = item.get("filePath").or_else(|| item.get("file")).and_then(|v| v.as_str()) else {
                continue;
            };
            let path_buf = std::path::Path::new(file_path);
            let path = if path_buf.is_absolute() {
                normalise_diagnostic_path(context.repo_root, path_buf)
            } else {
                normalise_diagnostic_path(context.repo_root, &context.repo_root.join(path_buf))
            };

            let range = item.get("range");
            let start = range.and_then(|r| r.get("start"));
            let line = start.and_then(|s| s.get("line")).and_then(serde_json::Value::as_u64).unwrap_or(0) as u32 + 1;
            let column = start.and_then(|s| s.get("character")).and_then(serde_json::Value::as_u64).unwrap_or(0) as u32 + 1;
            let code = item.get("rule").and_then(|v| v.as_str()).map(str::to_owned);
            let severity = item
                .get("severity")
                .and_then(|v| v.as_str())
                .map(Severity::coerce)
                .unwrap_or(Severity::Error);
            let message = item.get("message").and_then(|v| v.as_str()).unwrap_or_default().trim().to_owned();

            diagnostics.push(Diagnostic {
                tool: tool.clone(),
                severity,
                path,
                line,
                column,
                code,
                message,
                raw: item.clone(),
            });
        }

        let tool_summary = payload.get("summary").map(|summary| {
            let errors = summary.get("errorCount").and_then(serde_json::Value::as_u64).unwrap_or(0);
            let warnings = summary.get("warningCount").and_then(serde_json::Value::as_u64).unwrap_or(0);
            let information = summary.get("informationCount").and_then(serde_json::Value::as_u64).unwrap_or(0);
            ToolSummary { errors, warnings, information }
        });

        if let Some(summary) = tool_summary {
            let parsed_errors = diagnostics.iter().filter(|d| d.severity == Severity::Error).count() as u64;
            let parsed_warnings = diagnostics.iter().filter(|d| d.severity == Severity::Warning).count() as u64;
            if parsed_errors != summary.errors || parsed_warnings != summary.warnings {
                log::warn!(
                    "pyright summary mismatch: parsed={}/{} tool={}/{}",
                    parsed_errors,
                    parsed_warnings,
                    summary.errors,
                    summary.warnings
                );
            }
        }

        Ok(EngineResult {
            engine: crate::types::EngineName::new("pyright").expect("literal is non-empty"),
            mode: context.mode,
            argv,
            exit_code,
            duration_ms,
            diagnostics,
            tool_summary,
            cached: false,
        })
    }

    fn category_mapping(&self) -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([
            (
                "unknownChecks".to_owned(),
                vec!["reportUnknown".to_owned(), "reportMissingType".to_owned(), "reportUntyped".to_owned(), "Unknown".to_owned()],
            ),
            ("optionalChecks".to_owned(), vec!["reportOptional".to_owned(), "None".to_owned()]),
            ("unusedSymbols".to_owned(), vec!["reportUnused".to_owned(), "redundant".to_owned()]),
        ])
    }

    fn fingerprint_targets(&self, context: &EngineRunContext<'_>, _paths: &[String]) -> Vec<String> {
        if let Some(config) = &context.options.config_file {
            return vec![config.clone()];
        }
        let default_config = context.repo_root.join("pyrightconfig.json");
        if default_config.exists() {
            vec![default_config.display().to_string()]
        } else {
            Vec::new()
        }
    }
}
