use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Could not bind the HTTP listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Cache error.
    #[error(transparent)]
    Cache(#[from] proxmox_exporter_cache::Error),

    /// Endpoint pool error.
    #[error(transparent)]
    Pool(#[from] proxmox_exporter_pool::Error),

    /// The HTTP server exited with an error.
    #[error("http server error: {0}")]
    Serve(#[source] std::io::Error),

    /// Could not set global default subscriber.
    #[error("could not set global default subscriber: {0}")]
    SetTracing(#[from] tracing::dispatcher::SetGlobalDefaultError),
}
