use thiserror::Error;

/// Errors returned by acens operations.
#[derive(Debug, Error)]
pub enum AcError {
    #[error("acens: invalid geometry: {param}: {reason}")]
    InvalidGeometry { param: &'static str, reason: String },

    #[error("acens: invalid configuration: {param}: {reason}")]
    InvalidConfiguration { param: &'static str, reason: String },

    #[error("acens: realization {realization} is degenerate after {attempts} attempts")]
    DegenerateRealization { realization: usize, attempts: usize },

    #[error("acens: insufficient ensemble: {accepted} accepted realizations, {required} required")]
    InsufficientEnsemble { accepted: usize, required: usize },

    #[error("acens: model has not been fitted")]
    NotFitted,

    #[error("acens: base clustering failed: {0}")]
    BaseCluster(String),

    #[error("acens: thread pool: {0}")]
    ThreadPool(String),
}

impl AcError {
    pub(crate) fn config(param: &'static str, reason: impl Into<String>) -> Self {
        AcError::InvalidConfiguration {
            param,
            reason: reason.into(),
        }
    }
}

/// Result alias for acens operations.
pub type Result<T> = std::result::Result<T, AcError>;
