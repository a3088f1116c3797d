use thiserror::Error;

/// The result type for collection.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while collecting metrics.
#[derive(Debug, Error)]
pub enum Error {
    /// A response could not be decoded into its model.
    #[error("failed to decode {operation} response: {source}")]
    Decode {
        /// Operation name.
        operation: &'static str,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Encoded metrics were not valid UTF-8.
    #[error("metrics are not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// Metric registration or encoding failed.
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),

    /// The node list could not be obtained, so nothing can be collected.
    #[error("failed to list nodes: {0}")]
    NodeListing(#[source] Box<Error>),

    /// No endpoint answered a request.
    #[error(transparent)]
    Pool(#[from] proxmox_exporter_pool::Error),
}
