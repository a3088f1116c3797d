use thiserror::Error;

/// The result type for cache lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when managing the cache.
#[derive(Debug, Error)]
pub enum Error {
    /// The sweep task is already running.
    #[error("cache sweeper already started")]
    AlreadyStarted,
}
