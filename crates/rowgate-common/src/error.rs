//! Error types for RowGate
//!
//! The gate raises errors from a small closed set of kinds. Each carries a
//! machine-readable code and optional structured metadata so application
//! code can tell "you are not authorized" apart from "the database failed".

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

use crate::types::Operation;

/// Result type alias using RowGate's error type
pub type Result<T> = std::result::Result<T, RowGateError>;

/// Structured context validation issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Path to the offending field, empty for the root value
    pub path: Vec<String>,
    pub message: String,
}

impl Issue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            message: message.into(),
        }
    }

    pub fn at(path: &[&str], message: impl Into<String>) -> Self {
        Self {
            path: path.iter().map(|p| (*p).to_string()).collect(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.message)
        }
    }
}

/// Expected vs. actual value of a single field rejected by a check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub field: String,
    pub expected: JsonValue,
    pub actual: JsonValue,
}

/// Kind of an error surfaced through a gated handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ContextValidation,
    PolicyConfiguration,
    PolicyCheckFailed,
    UnsupportedOperation,
    /// The client itself failed. Never a [`RowGateError`]: client failures
    /// travel as the client's own error type and report this kind there.
    Adapter,
}

/// Errors raised by the gate
///
/// Client failures are not wrapped here. An adapter's error type carries
/// both (`From<RowGateError>`), so a constraint violation reaches the caller
/// in the client's own shape.
#[derive(Error, Debug, Clone)]
pub enum RowGateError {
    #[error("Context schema validation failed ({} issue(s))", .issues.len())]
    ContextValidation { issues: Vec<Issue> },

    #[error("Policy configuration error: {message}")]
    PolicyConfiguration { message: String, tables: Vec<String> },

    #[error("Policy check failed for {operation} on \"{table}\"")]
    PolicyCheckFailed {
        table: String,
        operation: Operation,
        mismatches: Vec<Mismatch>,
        reason: Option<String>,
    },

    #[error("{message}")]
    UnsupportedOperation { message: String },
}

impl RowGateError {
    pub fn context(issues: Vec<Issue>) -> Self {
        Self::ContextValidation { issues }
    }

    pub fn missing_policy(adapter: &str, tables: Vec<String>) -> Self {
        Self::PolicyConfiguration {
            message: format!(
                "Gate({adapter}): policy missing entries for tables: {}",
                tables.join(", ")
            ),
            tables,
        }
    }

    pub fn check_failed(table: impl Into<String>, operation: Operation) -> Self {
        Self::PolicyCheckFailed {
            table: table.into(),
            operation,
            mismatches: Vec::new(),
            reason: None,
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContextValidation { .. } => ErrorKind::ContextValidation,
            Self::PolicyConfiguration { .. } => ErrorKind::PolicyConfiguration,
            Self::PolicyCheckFailed { .. } => ErrorKind::PolicyCheckFailed,
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
        }
    }

    /// Error code for callers (matches the codes used across RowGate adapters)
    pub fn code(&self) -> &'static str {
        match self {
            Self::ContextValidation { .. } => "ROWGATE_CONTEXT_ERROR",
            Self::PolicyConfiguration { .. } => "ROWGATE_POLICY_CONFIG_ERROR",
            Self::PolicyCheckFailed { .. } => "ROWGATE_POLICY_ERROR",
            Self::UnsupportedOperation { .. } => "ROWGATE_NOT_SUPPORTED_ERROR",
        }
    }

    /// True when the caller was refused by policy rather than by a failure
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::PolicyCheckFailed { .. } | Self::UnsupportedOperation { .. }
        )
    }

    /// Structured metadata attached to the error
    pub fn meta(&self) -> JsonValue {
        match self {
            Self::ContextValidation { issues } => json!({ "issues": issues }),
            Self::PolicyConfiguration { tables, .. } => json!({ "tables": tables }),
            Self::PolicyCheckFailed {
                table,
                operation,
                mismatches,
                reason,
            } => {
                let mut meta = json!({ "table": table, "operation": operation });
                if !mismatches.is_empty() {
                    meta["mismatches"] = mismatches
                        .iter()
                        .map(|m| {
                            (
                                m.field.clone(),
                                json!({ "expected": m.expected, "actual": m.actual }),
                            )
                        })
                        .collect::<serde_json::Map<_, _>>()
                        .into();
                }
                if let Some(reason) = reason {
                    meta["reason"] = JsonValue::String(reason.clone());
                }
                meta
            }
            Self::UnsupportedOperation { .. } => JsonValue::Null,
        }
    }
}
