//! Error types for mdax-model.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("setup error: {0}")]
    Setup(String),

    #[error("variable not found: {0}")]
    UnknownVariable(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("{0}")]
    InvalidConfiguration(String),

    /// Raised by a component's setup, compute or partials code.
    #[error("{path}: {source}")]
    Component {
        path: String,
        #[source]
        source: mdax_core::Error,
    },

    #[error("singular matrix")]
    SingularMatrix,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{scope}: Newton failed to converge in {iterations} iterations")]
    ConvergenceFailed { scope: String, iterations: usize },

    #[error("problem is not set up")]
    NotSetUp,

    #[error(transparent)]
    Approx(#[from] mdax_approx::Error),

    #[error(transparent)]
    Core(#[from] mdax_core::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn component(path: &str, source: mdax_core::Error) -> Self {
        Error::Component {
            path: path.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
