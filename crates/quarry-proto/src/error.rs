//! Protocol error types.

use thiserror::Error;

/// Errors raised while converting protocol values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A value did not have the expected type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        found: &'static str,
    },

    /// A record field was not present.
    #[error("missing field: {0}")]
    MissingField(String),

    /// A datetime string could not be parsed.
    #[error("invalid datetime: {0}")]
    InvalidDateTime(String),
}
