//! Error types for mdax-approx.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidConfiguration(String),

    /// A model evaluation failed while a perturbation was applied.
    /// The perturbation was undone before this was returned.
    #[error("{scope}: evaluation failed: {message}")]
    EvaluationFailure { scope: String, message: String },

    #[error(
        "{scope}: sparsity of '{of}' wrt '{wrt}' excludes {count} entries which appear to be non-zero"
    )]
    SparsityMismatch {
        scope: String,
        of: String,
        wrt: String,
        count: usize,
    },

    #[error("variable not found: {0}")]
    UnknownVariable(String),

    #[error("incomplete assembly: {done} of {total} directions deposited")]
    IncompleteAssembly { done: usize, total: usize },

    #[error(transparent)]
    Core(#[from] mdax_core::Error),
}

impl Error {
    pub fn evaluation(scope: &str, message: impl std::fmt::Display) -> Self {
        Error::EvaluationFailure {
            scope: scope.to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
