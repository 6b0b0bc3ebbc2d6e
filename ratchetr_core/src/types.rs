//! Core type definitions shared across the audit pipeline.
//!
//! These are the newtypes and closed enums described by the data model: a
//! [`Severity`] and [`Mode`] closed set, `ToolName`/`EngineName`/`RunId`
//! newtypes over non-empty strings, and the immutable [`Diagnostic`] record
//! that every engine produces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed severity set. Unknown string inputs coerce to [`Severity::Information`]
/// rather than failing, matching the audit's "never abort silently" policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
}

impl Severity {
    /// Coerce an arbitrary tool-reported severity string. Never fails.
    #[must_use]
    pub fn coerce(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warning" | "warn" => Self::Warning,
            _ => Self::Information,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Information => write!(f, "information"),
        }
    }
}

impl FromStr for Severity {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::coerce(s))
    }
}

/// The scope of an engine run. `Target` is also spelled `full` at the
/// boundary (case-insensitive); both parse to the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Current,
    Target,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// Error returned when a mode string is neither `current`, `target`, nor `full`.
#[derive(Debug, thiserror::Error)]
#[error("unknown mode '{0}', expected 'current', 'target', or 'full'")]
pub struct UnknownModeError(pub String);

impl FromStr for Mode {
    type Err = UnknownModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "current" => Ok(Self::Current),
            "target" | "full" => Ok(Self::Target),
            other => Err(UnknownModeError(other.to_owned())),
        }
    }
}

macro_rules! nonempty_newtype {
    ($name:ident, $err:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        #[derive(Debug, thiserror::Error)]
        #[error(concat!(stringify!($name), " must not be empty"))]
        pub struct $err;

        impl $name {
            /// # Errors
            /// Returns an error when `value` is empty or all-whitespace.
            pub fn new(value: impl Into<String>) -> Result<Self, $err> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err($err);
                }
                Ok(Self(value))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

nonempty_newtype!(ToolName, EmptyToolNameError);
nonempty_newtype!(EngineName, EmptyEngineNameError);

/// `"{tool}:{mode}"`; uniquely identifies one engine invocation within a
/// manifest or ratchet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    #[must_use]
    pub fn new(tool: &ToolName, mode: Mode) -> Self {
        Self(format!("{tool}:{mode}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable diagnostic reported by an engine, already normalised to a
/// repo-relative POSIX path with 1-based line/column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub tool: ToolName,
    pub severity: Severity,
    /// Repo-relative, forward-slash path. May be an absolute path when
    /// resolution falls outside the repo root, or a sentinel like
    /// `<stderr>` / `<parse-error>`.
    pub path: String,
    pub line: u32,
    /// 0 is used when the column is unknown.
    pub column: u32,
    pub code: Option<String>,
    pub message: String,
    /// Opaque tool-specific payload (e.g. the raw JSON object), kept for
    /// callers that need more than the normalised fields.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Diagnostic {
    /// Ordering key for rendering and for the deterministic sort the
    /// orchestrator applies before returning results.
    #[must_use]
    pub fn order_key(&self) -> (&str, u32, u32) {
        (&self.path, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_coerces_unknown_to_information() {
        assert_eq!(Severity::coerce("bogus"), Severity::Information);
        assert_eq!(Severity::coerce("ERROR"), Severity::Error);
        assert_eq!(Severity::coerce("warn"), Severity::Warning);
    }

    #[test]
    fn severity_orders_error_first() {
        assert!(Severity::Error < Severity::Warning);
        assert!(Severity::Warning < Severity::Information);
    }

    #[test]
    fn mode_parses_case_insensitively_with_full_alias() {
        assert_eq!("Current".parse::<Mode>().unwrap(), Mode::Current);
        assert_eq!("TARGET".parse::<Mode>().unwrap(), Mode::Target);
        assert_eq!("full".parse::<Mode>().unwrap(), Mode::Target);
        assert!("bogus".parse::<Mode>().is_err());
    }

    #[test]
    fn run_id_formats_tool_colon_mode() {
        let tool = ToolName::new("pyright").unwrap();
        let run_id = RunId::new(&tool, Mode::Current);
        assert_eq!(run_id.as_str(), "pyright:current");
    }

    #[test]
    fn newtypes_reject_empty() {
        assert!(ToolName::new("").is_err());
        assert!(ToolName::new("   ").is_err());
        assert!(ToolName::new("pyright").is_ok());
    }

    #[test]
    fn diagnostic_order_key_is_path_line_column() {
        let d = Diagnostic {
            tool: ToolName::new("mypy").unwrap(),
            severity: Severity::Error,
            path: "a.py".to_owned(),
            line: 3,
            column: 1,
            code: None,
            message: "boom".to_owned(),
            raw: serde_json::Value::Null,
        };
        assert_eq!(d.order_key(), ("a.py", 3, 1));
    }
}
