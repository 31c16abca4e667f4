//! Error Types
//!
//! This module provides the error taxonomy shared by every reconciliation
//! engine.
//!
//! Errors are scoped: a `Validation` or `MergeConflict` error is fatal for a
//! single template, a `Resolution` error is fatal for a single
//! (template, account) pair, and an `Invariant` error signals a bug in a
//! provider collaborator. Orchestrators collect the first three into a run
//! report and keep going; invariant errors are propagated immediately.
//!
//! # Example
//!
//! ```
//! use iambic_core::{IambicError, Result};
//!
//! fn check_identifier(identifier: &str) -> Result<()> {
//!     if identifier.is_empty() {
//!         return Err(IambicError::validation("<unnamed>", "identifier must not be empty"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_identifier("").is_err());
//! ```

use serde::Serialize;
use thiserror::Error;

/// Standardized error type for the reconciliation core.
///
/// # Variants
///
/// - `Validation` - malformed template (unknown type, schema violation)
/// - `Resolution` - unknown variable token or invalid account pattern
/// - `MergeConflict` - existing and observed templates cannot be reconciled
/// - `Invariant` - inconsistent input from a provider collaborator
/// - `Serialization` / `Io` - template (de)serialization helpers
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IambicError {
    /// Malformed template.
    ///
    /// Fatal for the template it names, never for the whole run.
    #[error("Validation error in template '{template}'{}: {message}", .field.as_ref().map(|f| format!(" at '{f}'")).unwrap_or_default())]
    Validation {
        /// Identifier of the offending template
        template: String,
        /// Optional path of the offending field (e.g. "properties.tags")
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        /// Description of what is wrong
        message: String,
    },

    /// A template could not be resolved for one account.
    #[error("Resolution error for template '{template}' on account '{account}': {message}")]
    Resolution {
        /// Identifier of the template being resolved
        template: String,
        /// Account the template was being resolved for
        account: String,
        /// Description of the failure
        message: String,
    },

    /// The on-disk template and the observed state disagree structurally.
    #[error("Merge conflict in template '{template}': {message}")]
    MergeConflict {
        /// Identifier of the template being merged
        template: String,
        /// Description of the conflict
        message: String,
    },

    /// Input violated an engine precondition.
    #[error("Invariant violated: {message}")]
    Invariant {
        /// Description of the violated precondition
        message: String,
    },

    /// Template document could not be (de)serialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Underlying parser message, including location when known
        message: String,
    },

    /// Template file could not be read or written.
    #[error("I/O error: {message}")]
    Io {
        /// Underlying I/O message
        message: String,
    },
}

/// Coarse classification of an [`IambicError`], used for report aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`IambicError::Validation`].
    Validation,
    /// See [`IambicError::Resolution`].
    Resolution,
    /// See [`IambicError::MergeConflict`].
    MergeConflict,
    /// See [`IambicError::Invariant`].
    Invariant,
    /// See [`IambicError::Serialization`] and [`IambicError::Io`].
    Storage,
}

impl ErrorKind {
    /// Get the string representation used in reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Resolution => "resolution",
            ErrorKind::MergeConflict => "merge_conflict",
            ErrorKind::Invariant => "invariant",
            ErrorKind::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl IambicError {
    /// Create a validation error without a field path.
    pub fn validation(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            template: template.into(),
            field: None,
            message: message.into(),
        }
    }

    /// Create a validation error pointing at a field.
    pub fn validation_at(
        template: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            template: template.into(),
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Create a resolution error.
    pub fn resolution(
        template: impl Into<String>,
        account: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            template: template.into(),
            account: account.into(),
            message: message.into(),
        }
    }

    /// Create a merge conflict error.
    pub fn merge_conflict(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MergeConflict {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Create an invariant error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            IambicError::Validation { .. } => ErrorKind::Validation,
            IambicError::Resolution { .. } => ErrorKind::Resolution,
            IambicError::MergeConflict { .. } => ErrorKind::MergeConflict,
            IambicError::Invariant { .. } => ErrorKind::Invariant,
            IambicError::Serialization { .. } | IambicError::Io { .. } => ErrorKind::Storage,
        }
    }

    /// Whether this error indicates a bug in a collaborator rather than user error.
    ///
    /// Invariant errors must not be swallowed into a partial-failure report.
    #[must_use]
    pub fn is_invariant(&self) -> bool {
        matches!(self, IambicError::Invariant { .. })
    }

    /// Whether this error only affects a single (template, account) pair.
    #[must_use]
    pub fn is_account_scoped(&self) -> bool {
        matches!(self, IambicError::Resolution { .. })
    }
}

impl From<serde_yaml::Error> for IambicError {
    fn from(err: serde_yaml::Error) -> Self {
        let location = err
            .location()
            .map(|loc| format!(" at line {}, column {}", loc.line(), loc.column()))
            .unwrap_or_default();
        Self::Serialization {
            message: format!("invalid YAML{location}: {err}"),
        }
    }
}

impl From<serde_json::Error> for IambicError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for IambicError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Type alias for Results using [`IambicError`].
pub type Result<T> = std::result::Result<T, IambicError>;
