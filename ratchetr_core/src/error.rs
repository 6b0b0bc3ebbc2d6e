//! Stable error taxonomy for `ratchetr-core`.
//!
//! Every surfaced error carries a stable `TW###` code (via [`ErrorKind`] /
//! [`error_code_for`]), the component that raised it, and enough context to
//! reproduce. Validation errors are distinguished from operational
//! (`RuntimeError`-style) failures so callers can decide whether to retry.

use std::fmt;

/// Stable error code, e.g. `"TW401"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub &'static str);

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of error kinds. Mirrors the abstract taxonomy: every kind maps
/// to exactly one stable code via [`error_code_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unclassified,
    Validation,
    TypeCoercion,
    ConfigValidation,
    ManifestValidation,
    RatchetModelValidation,
    ReadinessValidation,
    SubprocessInvocation,
    EngineOutputParse,
    CacheIo,
    ManifestNotFound,
    AmbiguousManifest,
    RatchetFileExists,
    RatchetPathRequired,
    UnknownEngineProfile,
}

/// Map an [`ErrorKind`] to its stable `TW###` code. Exhaustive by construction.
#[must_use]
pub fn error_code_for(kind: ErrorKind) -> ErrorCode {
    match kind {
        ErrorKind::Unclassified => ErrorCode("TW000"),
        ErrorKind::Validation => ErrorCode("TW100"),
        ErrorKind::TypeCoercion => ErrorCode("TW101"),
        ErrorKind::ConfigValidation => ErrorCode("TW110"),
        ErrorKind::ManifestValidation => ErrorCode("TW300"),
        ErrorKind::RatchetModelValidation => ErrorCode("TW310"),
        ErrorKind::ReadinessValidation => ErrorCode("TW201"),
        ErrorKind::SubprocessInvocation => ErrorCode("TW400"),
        ErrorKind::EngineOutputParse => ErrorCode("TW401"),
        ErrorKind::CacheIo => ErrorCode("TW410"),
        ErrorKind::ManifestNotFound => ErrorCode("TW420"),
        ErrorKind::AmbiguousManifest => ErrorCode("TW421"),
        ErrorKind::RatchetFileExists => ErrorCode("TW430"),
        ErrorKind::RatchetPathRequired => ErrorCode("TW431"),
        ErrorKind::UnknownEngineProfile => ErrorCode("TW440"),
    }
}

/// Root error type for the crate. Each variant carries the context needed to
/// reproduce the failure (a path, a key, a field name).
#[derive(Debug, thiserror::Error)]
pub enum RatchetrError {
    #[error("[{code}] validation error at '{field}': {message}", code = error_code_for(ErrorKind::Validation))]
    Validation { field: String, message: String },

    #[error("[{code}] cannot coerce value for '{field}': {message}", code = error_code_for(ErrorKind::TypeCoercion))]
    TypeCoercion { field: String, message: String },

    #[error("[{code}] invalid config field '{field}': {message}", code = error_code_for(ErrorKind::ConfigValidation))]
    ConfigValidation { field: String, message: String },

    #[error("[{code}] manifest validation failed: {message}", code = error_code_for(ErrorKind::ManifestValidation))]
    ManifestValidation { message: String },

    #[error("[{code}] ratchet model validation failed: {message}", code = error_code_for(ErrorKind::RatchetModelValidation))]
    RatchetModelValidation { message: String },

    #[error("[{code}] readiness validation failed: {message}", code = error_code_for(ErrorKind::ReadinessValidation))]
    ReadinessValidation { message: String },

    #[error("[{code}] refused to invoke '{executable}': not in the engine allow-list", code = error_code_for(ErrorKind::SubprocessInvocation))]
    SubprocessInvocation { executable: String },

    #[error("[{code}] failed to parse {tool} output: {message}", code = error_code_for(ErrorKind::EngineOutputParse))]
    EngineOutputParse { tool: String, message: String },

    #[error("[{code}] cache I/O error at '{path}': {message}", code = error_code_for(ErrorKind::CacheIo))]
    CacheIo { path: String, message: String },

    #[error("[{code}] no manifest found; attempted {attempted} candidate paths", code = error_code_for(ErrorKind::ManifestNotFound))]
    ManifestNotFound { attempted: usize },

    #[error("[{code}] ambiguous manifest: {message}", code = error_code_for(ErrorKind::AmbiguousManifest))]
    AmbiguousManifest { message: String },

    #[error("[{code}] ratchet file already exists at '{path}' (use force to overwrite)", code = error_code_for(ErrorKind::RatchetFileExists))]
    RatchetFileExists { path: String },

    #[error("[{code}] this operation requires a ratchet path and none was resolved", code = error_code_for(ErrorKind::RatchetPathRequired))]
    RatchetPathRequired,

    #[error("[{code}] unknown profile '{profile}' for engine '{engine}'", code = error_code_for(ErrorKind::UnknownEngineProfile))]
    UnknownEngineProfile { engine: String, profile: String },
}

impl RatchetrError {
    /// The abstract kind of this error, for callers that want to branch on
    /// category rather than match every variant.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::TypeCoercion { .. } => ErrorKind::TypeCoercion,
            Self::ConfigValidation { .. } => ErrorKind::ConfigValidation,
            Self::ManifestValidation { .. } => ErrorKind::ManifestValidation,
            Self::RatchetModelValidation { .. } => ErrorKind::RatchetModelValidation,
            Self::ReadinessValidation { .. } => ErrorKind::ReadinessValidation,
            Self::SubprocessInvocation { .. } => ErrorKind::SubprocessInvocation,
            Self::EngineOutputParse { .. } => ErrorKind::EngineOutputParse,
            Self::CacheIo { .. } => ErrorKind::CacheIo,
            Self::ManifestNotFound { .. } => ErrorKind::ManifestNotFound,
            Self::AmbiguousManifest { .. } => ErrorKind::AmbiguousManifest,
            Self::RatchetFileExists { .. } => ErrorKind::RatchetFileExists,
            Self::RatchetPathRequired => ErrorKind::RatchetPathRequired,
            Self::UnknownEngineProfile { .. } => ErrorKind::UnknownEngineProfile,
        }
    }

    /// Stable `TW###` code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        error_code_for(self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_maps_to_a_distinct_code() {
        let kinds = [
            ErrorKind::Unclassified,
            ErrorKind::Validation,
            ErrorKind::TypeCoercion,
            ErrorKind::ConfigValidation,
            ErrorKind::ManifestValidation,
            ErrorKind::RatchetModelValidation,
            ErrorKind::ReadinessValidation,
            ErrorKind::SubprocessInvocation,
            ErrorKind::EngineOutputParse,
            ErrorKind::CacheIo,
            ErrorKind::ManifestNotFound,
            ErrorKind::AmbiguousManifest,
            ErrorKind::RatchetFileExists,
            ErrorKind::RatchetPathRequired,
            ErrorKind::UnknownEngineProfile,
        ];
        let mut codes: Vec<&str> = kinds.iter().map(|k| error_code_for(*k).0).collect();
        let before = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), before, "duplicate TW### code assigned");
    }

    #[test]
    fn error_kind_roundtrips_through_ratchetr_error() {
        let err = RatchetrError::RatchetPathRequired;
        assert_eq!(err.kind(), ErrorKind::RatchetPathRequired);
        assert_eq!(err.code().0, "TW431");
    }

    #[test]
    fn display_includes_stable_code() {
        let err = RatchetrError::SubprocessInvocation {
            executable: "rm".to_owned(),
        };
        assert!(err.to_string().contains("TW400"));
    }
}
