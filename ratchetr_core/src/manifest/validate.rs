//! Manifest structural validation — component G.
//!
//! Two validation strictness levels: `Loader` (used when reading a manifest
//! back in for `ratchet update`/`check`, tolerant of older-but-migratable
//! versions) and `Strict` (used by `manifest validate`, rejects anything
//! that isn't exactly [`super::MANIFEST_VERSION`]).

use super::{Manifest, MANIFEST_VERSION};
use crate::error::RatchetrError;

/// How strictly to validate a manifest payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Accept any version `<= MANIFEST_VERSION`, migrating older ones.
    Loader,
    /// Accept only exactly `MANIFEST_VERSION`.
    Strict,
}

/// Parse and validate raw manifest JSON.
///
/// # Errors
/// Returns [`RatchetrError::ManifestValidation`] if the payload doesn't
/// parse as a [`Manifest`], or if version validation fails for `mode`.
pub fn validate_manifest_json(raw: &str, mode: ValidationMode) -> Result<Manifest, RatchetrError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| RatchetrError::ManifestValidation { message: e.to_string() })?;
    validate_manifest_value(value, mode)
}

/// Validate an already-parsed manifest payload, applying version migration
/// under [`ValidationMode::Loader`].
///
/// # Errors
/// Returns [`RatchetrError::ManifestValidation`] when the version is newer
/// than this crate understands, or (under `Strict`) not exactly current.
pub fn validate_manifest_value(mut value: serde_json::Value, mode: ValidationMode) -> Result<Manifest, RatchetrError> {
    let raw_version = value.get("version").and_then(serde_json::Value::as_u64);

    match mode {
        ValidationMode::Strict => {
            let version = raw_version
                .ok_or_else(|| RatchetrError::ManifestValidation { message: "missing 'version' field".to_owned() })?;
            if version != u64::from(MANIFEST_VERSION) {
                return Err(RatchetrError::ManifestValidation {
                    message: format!("expected manifest version {MANIFEST_VERSION}, found {version}"),
                });
            }
        }
        ValidationMode::Loader => {
            // An absent version predates schema versioning: treat it as
            // current rather than rejecting the payload.
            let version = raw_version.unwrap_or(u64::from(MANIFEST_VERSION));
            if version > u64::from(MANIFEST_VERSION) {
                return Err(RatchetrError::ManifestValidation {
                    message: format!("manifest version {version} is newer than supported version {MANIFEST_VERSION}"),
                });
            }
            if raw_version.is_none() {
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("version".to_owned(), serde_json::Value::from(MANIFEST_VERSION));
                }
            }
            migrate_in_place(&mut value, version);
        }
    }

    serde_json::from_value(value).map_err(|e| RatchetrError::ManifestValidation { message: e.to_string() })
}

/// Forward-migrate a manifest payload from `from_version` to
/// [`MANIFEST_VERSION`] in place. A no-op today since only one version
/// exists; kept as the seam future schema bumps hook into.
fn migrate_in_place(value: &mut serde_json::Value, from_version: u64) {
    if from_version == u64::from(MANIFEST_VERSION) {
        return;
    }
    if let Some(obj) = value.as_object_mut() {
        obj.insert("version".to_owned(), serde_json::Value::from(MANIFEST_VERSION));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_manifest_json() -> String {
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            generated_at: Utc::now(),
            runs: BTreeMap::new(),
            readiness: super::super::Readiness::default(),
        };
        manifest.to_json_pretty().unwrap()
    }

    #[test]
    fn strict_accepts_current_version() {
        let json = sample_manifest_json();
        assert!(validate_manifest_json(&json, ValidationMode::Strict).is_ok());
    }

    #[test]
    fn strict_rejects_missing_version() {
        let result = validate_manifest_json("{}", ValidationMode::Strict);
        assert!(result.is_err());
    }

    #[test]
    fn loader_rejects_future_version() {
        let json = r#"{"version": 999, "generatedAt": "2026-01-01T00:00:00Z", "runs": {}, "readiness": {"strict": {"ready": [], "close": [], "blocked": []}, "options": {}}}"#;
        let result = validate_manifest_json(json, ValidationMode::Loader);
        assert!(result.is_err());
    }

    #[test]
    fn loader_accepts_current_version() {
        let json = sample_manifest_json();
        assert!(validate_manifest_json(&json, ValidationMode::Loader).is_ok());
    }

    #[test]
    fn loader_defaults_missing_version_to_current() {
        let json = r#"{"generatedAt": "2026-01-01T00:00:00Z", "runs": {}, "readiness": {"strict": {"ready": [], "close": [], "blocked": []}, "options": {}}}"#;
        let manifest = validate_manifest_json(json, ValidationMode::Loader).unwrap();
        assert_eq!(manifest.version, MANIFEST_VERSION);
    }
}
