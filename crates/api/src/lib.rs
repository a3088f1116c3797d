//! Typed access to the parts of the Proxmox VE REST API that the exporter
//! reads, plus the [`ApiClient`] seam the endpoint pool is built on.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod error;
mod operation;
mod types;

/// Deserializers for loosely-typed API fields.
pub mod serde_lenient;

pub use client::{
    ApiToken, DEFAULT_REQUEST_TIMEOUT, HttpClient, HttpClientOptions, normalize_base_url,
};
pub use error::{Error, Result};
pub use operation::Operation;
pub use types::*;

use async_trait::async_trait;
use serde_json::Value;

/// A single upstream API endpoint.
///
/// Implementations return the `data` member of the API response envelope
/// untouched; decoding into the typed models happens after caching so that
/// cached payloads stay endpoint-agnostic.
#[async_trait]
pub trait ApiClient
where
    Self: Send + Sync + 'static,
{
    /// Host name of the endpoint, used to identify it in logs.
    fn hostname(&self) -> &str;

    /// Issue `operation` against this endpoint.
    async fn get(&self, operation: &Operation) -> Result<Value>;
}
