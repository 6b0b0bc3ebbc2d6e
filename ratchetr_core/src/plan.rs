//! Engine Registry & Plan Builder — component C.
//!
//! Engines are modelled as a trait-object registry (builtins plus
//! dynamically-registered entries described by [`EngineDescriptor`]), the
//! same shape the teacher uses for its checker registry. Plan building
//! merges audit-level, engine-level, profile, and path-override settings
//! into a single content-addressable [`EnginePlan`].

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::{AuditConfig, EngineSettings, PathOverride, ProfileConfig};
use crate::error::RatchetrError;
use crate::types::{EngineName, Mode};

/// Where an engine came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineOrigin {
    Builtin,
    Plugin,
}

/// Describes one discovered engine, builtin or plugin. Entries that don't
/// conform to [`BaseEngine`] are silently dropped by the registry (logged at
/// debug level), never surfaced as an error.
#[derive(Debug, Clone)]
pub struct EngineDescriptor {
    pub name: EngineName,
    pub module: String,
    pub qualified_name: String,
    pub origin: EngineOrigin,
}

/// The capability every engine implements.
pub trait BaseEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run this engine for the given plan, returning the raw outcome. The
    /// orchestrator (component D) is the only caller.
    fn run(&self, context: &EngineRunContext<'_>, paths: &[String]) -> Result<crate::orchestrator::EngineResult, RatchetrError>;

    /// Category → rule-substring-list mapping used by the manifest
    /// aggregator's `categoryCounts` bucketing. Engines that don't classify
    /// diagnostics into categories can omit this.
    fn category_mapping(&self) -> BTreeMap<String, Vec<String>> {
        BTreeMap::new()
    }

    /// Extra files whose content should participate in the cache key
    /// (beyond the scanned paths themselves), e.g. `pyrightconfig.json`.
    fn fingerprint_targets(&self, _context: &EngineRunContext<'_>, _paths: &[String]) -> Vec<String> {
        Vec::new()
    }
}

/// Context handed to [`BaseEngine::run`]: resolved repo root and the
/// canonical options for this invocation.
pub struct EngineRunContext<'a> {
    pub repo_root: &'a std::path::Path,
    pub mode: Mode,
    pub options: &'a EngineOptions,
}

/// Merge result of (defaults) ← (engine settings) ← (active profile) ←
/// (path override), per spec §3.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Ordered, first-occurrence-deduped.
    pub plugin_args: Vec<String>,
    pub config_file: Option<String>,
    /// Repo-relative POSIX, deduped.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub profile: Option<String>,
    pub overrides: Vec<OverrideRecord>,
    pub category_mapping: BTreeMap<String, Vec<String>>,
}

/// A single normalised override record (sourced from a path override's
/// engine settings). Canonicalised (sorted) before it enters a signature
/// hash — see spec §9's open question on override-list canonicalisation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub path: String,
    pub plugin_args: Vec<String>,
}

impl EngineOptions {
    /// Sort `overrides` by `(path, plugin_args)` so two logically-identical
    /// option sets expressed in different override order hash identically.
    pub fn canonicalize(&mut self) {
        self.overrides.sort();
        dedup_preserve_order(&mut self.plugin_args);
        self.include.sort();
        self.include.dedup();
        self.exclude.sort();
        self.exclude.dedup();
    }
}

fn dedup_preserve_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

/// Canonical, fingerprint-stable representation of one (engine, mode,
/// resolved scope) execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginePlan {
    pub engine_name: EngineName,
    pub mode: Mode,
    pub resolved_scope: Vec<String>,
    pub options: EngineOptions,
}

impl EnginePlan {
    /// Two plans are equivalent iff engine_name, resolved_scope (sorted),
    /// and every field of `options` match; `mode` does NOT participate
    /// (spec §3/§9: mode is an invocation label, not a plan-identity field —
    /// it IS, however, part of the cache key; see `cache::CacheKey`).
    #[must_use]
    pub fn is_equivalent_to(&self, other: &EnginePlan) -> bool {
        if self.engine_name != other.engine_name {
            return false;
        }
        let mut a = self.resolved_scope.clone();
        let mut b = other.resolved_scope.clone();
        a.sort();
        b.sort();
        a == b && self.options == other.options
    }

    /// Content-addressable hash of this plan's options, used by the cache
    /// key and by the ratchet engine's signature.
    #[must_use]
    pub fn options_hash(&self) -> String {
        let value = serde_json::to_value(&self.options).unwrap_or(serde_json::Value::Null);
        crate::config::content_hash(&value)
    }
}

/// Error produced when plan building references an undefined profile.
#[must_use]
pub fn unknown_profile_error(engine: &str, profile: &str) -> RatchetrError {
    RatchetrError::UnknownEngineProfile {
        engine: engine.to_owned(),
        profile: profile.to_owned(),
    }
}

/// Inputs for [`build_plan`], already resolved from CLI/config (the audit
/// config's per-engine settings, the active-profile selection, and any
/// path overrides whose prefix matches a scanned path).
pub struct PlanInputs<'a> {
    pub audit: &'a AuditConfig,
    pub cli_plugin_args: &'a HashMap<String, Vec<String>>,
    pub cli_active_profiles: &'a HashMap<String, String>,
    pub scanned_paths: &'a [String],
}

/// Build an [`EnginePlan`] for one engine, following the six-step merge
/// described by spec §4.C.
///
/// # Errors
/// Returns [`RatchetrError::UnknownEngineProfile`] when an active profile
/// is named but not defined on the engine.
pub fn build_plan(
    engine_name: &EngineName,
    mode: Mode,
    repo_root_relative_default: &[String],
    inputs: &PlanInputs<'_>,
) -> Result<EnginePlan, RatchetrError> {
    let settings = inputs.audit.engines.get(engine_name.as_str()).cloned().unwrap_or_default();

    // 1. audit-level plugin_args[engine]
    let mut plugin_args: Vec<String> = inputs
        .cli_plugin_args
        .get(engine_name.as_str())
        .cloned()
        .unwrap_or_default();

    // 2. engine's engine_settings[engine].plugin_args
    plugin_args.extend(settings.plugin_args.iter().cloned());

    let mut include = settings.include.clone();
    let mut exclude = settings.exclude.clone();
    let mut config_file = settings.config_file.clone();

    // 3. select active profile
    let profile_name = inputs
        .cli_active_profiles
        .get(engine_name.as_str())
        .cloned()
        .or_else(|| settings.default_profile.clone());

    let mut overrides = Vec::new();

    if let Some(ref name) = profile_name {
        let profile = resolve_profile(&settings, name).ok_or_else(|| unknown_profile_error(engine_name.as_str(), name))?;
        // 4. append profile's plugin_args; union include/exclude; override
        //    config_file if the profile provides one.
        plugin_args.extend(profile.plugin_args.iter().cloned());
        include.extend(profile.include.iter().cloned());
        exclude.extend(profile.exclude.iter().cloned());
        if profile.config_file.is_some() {
            config_file = profile.config_file.clone();
        }
    }

    // 5. apply path overrides whose prefix matches a scanned path
    let mut active_profile_for_engine = profile_name.clone();
    for path_override in longest_prefix_first(&inputs.audit.path_overrides) {
        if !inputs
            .scanned_paths
            .iter()
            .any(|p| p.starts_with(&path_override.path))
        {
            continue;
        }
        if let Some(engine_override) = path_override.engine_settings.get(engine_name.as_str()) {
            plugin_args.extend(engine_override.plugin_args.iter().cloned());
            include.extend(engine_override.include.iter().cloned());
            exclude.extend(engine_override.exclude.iter().cloned());
            overrides.push(OverrideRecord {
                path: path_override.path.clone(),
                plugin_args: engine_override.plugin_args.clone(),
            });
        }
        if let Some(profile) = path_override.active_profiles.get(engine_name.as_str()) {
            active_profile_for_engine = Some(profile.clone());
        }
    }

    // 6. normalise include/exclude relative to repo_root; apply include
    //    then subtract exclude by path-prefix match.
    if include.is_empty() {
        include = repo_root_relative_default.to_vec();
    }
    let resolved_scope: Vec<String> = include
        .iter()
        .filter(|p| !exclude.iter().any(|ex| p.starts_with(ex.as_str())))
        .cloned()
        .collect();

    let mut options = EngineOptions {
        plugin_args,
        config_file,
        include,
        exclude,
        profile: active_profile_for_engine,
        overrides,
        category_mapping: BTreeMap::new(),
    };
    options.canonicalize();

    Ok(EnginePlan {
        engine_name: engine_name.clone(),
        mode,
        resolved_scope,
        options,
    })
}

/// Resolve a profile by name, following its `inherit` chain (spec §6:
/// `inherit = "other_profile"`). Fields are merged root-first so the most
/// specific (named) profile's values win; a cycle in the chain stops the
/// walk at the point it repeats rather than looping forever.
fn resolve_profile(settings: &EngineSettings, name: &str) -> Option<ProfileConfig> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = name;
    loop {
        if !seen.insert(current.to_owned()) {
            break;
        }
        let profile = settings.profiles.get(current)?;
        chain.push(profile);
        match profile.inherit.as_deref() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    let mut merged = ProfileConfig::default();
    for profile in chain.into_iter().rev() {
        merged.plugin_args.extend(profile.plugin_args.iter().cloned());
        merged.include.extend(profile.include.iter().cloned());
        merged.exclude.extend(profile.exclude.iter().cloned());
        if profile.config_file.is_some() {
            merged.config_file = profile.config_file.clone();
        }
    }
    Some(merged)
}

/// Apply path overrides in longest-prefix-first order, per spec §9.
fn longest_prefix_first(overrides: &[PathOverride]) -> Vec<&PathOverride> {
    let mut sorted: Vec<&PathOverride> = overrides.iter().collect();
    sorted.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(name: &str) -> EngineName {
        EngineName::new(name).unwrap()
    }

    #[test]
    fn plan_equivalence_ignores_mode() {
        let a = EnginePlan {
            engine_name: engine("pyright"),
            mode: Mode::Current,
            resolved_scope: vec!["a.py".to_owned()],
            options: EngineOptions::default(),
        };
        let mut b = a.clone();
        b.mode = Mode::Target;
        assert!(a.is_equivalent_to(&b));
    }

    #[test]
    fn plan_equivalence_ignores_scope_order() {
        let mut a = EnginePlan {
            engine_name: engine("pyright"),
            mode: Mode::Current,
            resolved_scope: vec!["a.py".to_owned(), "b.py".to_owned()],
            options: EngineOptions::default(),
        };
        let mut b = a.clone();
        b.resolved_scope = vec!["b.py".to_owned(), "a.py".to_owned()];
        assert!(a.is_equivalent_to(&b));
        a.options.plugin_args.push("--strict".to_owned());
        assert!(!a.is_equivalent_to(&b));
    }

    #[test]
    fn build_plan_fails_on_unknown_profile() {
        let mut audit = AuditConfig::default();
        audit.engines.insert("pyright".to_owned(), EngineSettings::default());
        let inputs = PlanInputs {
            audit: &audit,
            cli_plugin_args: &HashMap::new(),
            cli_active_profiles: &[("pyright".to_owned(), "strict".to_owned())].into_iter().collect(),
            scanned_paths: &[],
        };
        let result = build_plan(&engine("pyright"), Mode::Current, &[], &inputs);
        assert!(matches!(result, Err(RatchetrError::UnknownEngineProfile { .. })));
    }

    #[test]
    fn build_plan_merges_profile_plugin_args() {
        let mut settings = EngineSettings::default();
        settings.profiles.insert(
            "strict".to_owned(),
            ProfileConfig {
                plugin_args: vec!["--strict".to_owned()],
                ..Default::default()
            },
        );
        settings.default_profile = Some("strict".to_owned());
        let mut audit = AuditConfig::default();
        audit.engines.insert("pyright".to_owned(), settings);

        let inputs = PlanInputs {
            audit: &audit,
            cli_plugin_args: &HashMap::new(),
            cli_active_profiles: &HashMap::new(),
            scanned_paths: &[],
        };
        let plan = build_plan(&engine("pyright"), Mode::Current, &["src".to_owned()], &inputs).unwrap();
        assert_eq!(plan.options.plugin_args, vec!["--strict".to_owned()]);
        assert_eq!(plan.options.profile, Some("strict".to_owned()));
    }

    #[test]
    fn build_plan_excludes_by_prefix() {
        let mut settings = EngineSettings::default();
        settings.include = vec!["src/a.py".to_owned(), "src/vendor/b.py".to_owned()];
        settings.exclude = vec!["src/vendor".to_owned()];
        let mut audit = AuditConfig::default();
        audit.engines.insert("pyright".to_owned(), settings);

        let inputs = PlanInputs {
            audit: &audit,
            cli_plugin_args: &HashMap::new(),
            cli_active_profiles: &HashMap::new(),
            scanned_paths: &[],
        };
        let plan = build_plan(&engine("pyright"), Mode::Current, &[], &inputs).unwrap();
        assert_eq!(plan.resolved_scope, vec!["src/a.py".to_owned()]);
    }

    #[test]
    fn options_hash_is_order_independent_after_canonicalize() {
        let mut opts1 = EngineOptions {
            overrides: vec![
                OverrideRecord { path: "b".to_owned(), plugin_args: vec![] },
                OverrideRecord { path: "a".to_owned(), plugin_args: vec![] },
            ],
            ..Default::default()
        };
        let mut opts2 = EngineOptions {
            overrides: vec![
                OverrideRecord { path: "a".to_owned(), plugin_args: vec![] },
                OverrideRecord { path: "b".to_owned(), plugin_args: vec![] },
            ],
            ..Default::default()
        };
        opts1.canonicalize();
        opts2.canonicalize();
        assert_eq!(opts1, opts2);
    }
}
