//! Error types for mdax-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("variable not found: {0}")]
    UnknownVariable(String),

    #[error("duplicate variable: {0}")]
    DuplicateVariable(String),

    #[error("shape mismatch for '{name}': expected {expected} values, got {actual}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("{0}")]
    InvalidConfiguration(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Raised by a component's own compute or partials code.
    #[error("{0}")]
    Compute(String),
}

pub type Result<T> = std::result::Result<T, Error>;
