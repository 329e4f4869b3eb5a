use std::error::Error;
use thiserror::Error;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
///
/// Model collaborators report their failures with this type.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Errors raised while computing or drawing PCA diagnostics.
#[derive(Debug, Error)]
pub enum DiagnosticsError {
    /// Too many, too few, or out-of-range components were requested.
    #[error(
        "The number of components to plot must not exceed 2 and the component choice cannot exceed \
         the number of components in the model (requested {requested:?}, model has {available})"
    )]
    InvalidComponentSelection {
        requested: Vec<usize>,
        available: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Cross-validation statistics were required but the model has none.
    #[error("cross-validation statistics are not available; run cross-validation on the model first")]
    MissingCrossValidation,

    #[error("invalid F-distribution degrees of freedom ({numerator}, {denominator})")]
    InvalidDegreesOfFreedom { numerator: f64, denominator: f64 },

    #[error("{what}: expected length {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("non-finite statistic: {0}")]
    NonFiniteStatistic(String),

    #[error("failed to build distribution: {0}")]
    Distribution(String),

    /// The chart backend failed to draw a figure.
    #[error("rendering error: {0}")]
    Rendering(String),

    /// An error returned by the model, passed through untouched.
    #[error(transparent)]
    Model(ThreadSafeStdError),
}

pub type Result<T> = std::result::Result<T, DiagnosticsError>;
