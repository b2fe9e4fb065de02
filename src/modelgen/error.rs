//! Error taxonomy of the compilation pipeline.
//!
//! Classification and rewriting errors are fatal: the right-hand side must
//! always compile. A [`ModelError::SymbolicFailure`] is recovered locally by
//! the derivation driver, downgrading exactly one artifact to non-existent.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// Malformed equation block (bad derivative target, duplicate or
    /// colliding declarations).
    #[error("parse error: {0}")]
    Parse(String),

    /// An identifier in an equation resolves to no known role.
    #[error("unknown symbol '{0}' in equation for '{1}'")]
    UnknownSymbol(String, String),

    /// The symbolic engine could not differentiate or invert; recovered per
    /// artifact, never fatal for the whole compilation.
    #[error("symbolic derivation of {artifact} failed: {reason}")]
    SymbolicFailure { artifact: String, reason: String },

    /// Mass matrix shape does not match the system dimension.
    #[error("mass matrix is {got_rows}x{got_cols}, expected {expected}x{expected}")]
    DimensionMismatch {
        got_rows: usize,
        got_cols: usize,
        expected: usize,
    },

    /// A call-surface mode was invoked whose artifact does not exist.
    #[error("model has no compiled '{0}' function: {1}")]
    Invocation(String, String),
}

impl ModelError {
    pub(crate) fn symbolic(artifact: &str, reason: impl Into<String>) -> Self {
        ModelError::SymbolicFailure {
            artifact: artifact.to_string(),
            reason: reason.into(),
        }
    }
}
