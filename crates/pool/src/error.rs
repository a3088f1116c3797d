use thiserror::Error;

/// The result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when issuing requests through the pool.
///
/// The type is `Clone` so one failure can be handed to every caller waiting
/// on a shared fetch.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The call was cancelled before an endpoint answered.
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation name.
        operation: &'static str,
    },

    /// The pool cannot be built from the given configuration.
    #[error("invalid endpoint configuration: {0}")]
    Configuration(String),

    /// Every endpoint was excluded or failed within one call.
    #[error("{operation} failed after {attempts} endpoint attempt(s): {last_error}")]
    Connectivity {
        /// Operation name.
        operation: &'static str,
        /// Number of endpoints tried.
        attempts: usize,
        /// Last upstream error, or why no endpoint could be tried.
        last_error: String,
    },

    /// The recovery task is already running.
    #[error("recovery task already started")]
    RecoveryAlreadyStarted,
}
