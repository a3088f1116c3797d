use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::{ApiClient, Error, Operation, Result};

const API_PATH: &str = "api2/json/";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A pre-issued API token (`user@realm!tokenid` plus its secret).
#[derive(Clone)]
pub struct ApiToken {
    id: String,
    secret: String,
}

impl ApiToken {
    /// Creates a new token from its id and secret.
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }

    /// The token id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn header_value(&self) -> Result<HeaderValue> {
        let mut value = HeaderValue::from_str(&format!("PVEAPIToken={}={}", self.id, self.secret))
            .map_err(|e| Error::InvalidToken(e.to_string()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Options for [`HttpClient`].
#[derive(Clone, Debug)]
pub struct HttpClientOptions {
    /// Accept self-signed or otherwise invalid TLS certificates.
    pub insecure_tls: bool,

    /// Timeout applied to every request.
    pub request_timeout: Duration,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            insecure_tls: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
}

/// HTTP client bound to a single API endpoint.
pub struct HttpClient {
    base_url: Url,
    client: Client,
    hostname: String,
}

impl HttpClient {
    /// Creates a client for `endpoint`, authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL with a host, if the
    /// token contains characters that cannot be sent in a header, or if the
    /// underlying HTTP client cannot be built.
    pub fn new(endpoint: &str, token: &ApiToken, options: &HttpClientOptions) -> Result<Self> {
        let base_url = normalize_base_url(endpoint)?;
        let hostname = base_url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl {
                url: endpoint.to_string(),
                reason: "missing host".to_string(),
            })?
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, token.header_value()?);

        let client = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(options.insecure_tls)
            .timeout(options.request_timeout)
            .build()?;

        debug!("Created API client for {} ({})", hostname, base_url);

        Ok(Self {
            base_url,
            client,
            hostname,
        })
    }

    /// The normalized API base URL, ending in `/api2/json/`.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl ApiClient for HttpClient {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn get(&self, operation: &Operation) -> Result<Value> {
        let url = self
            .base_url
            .join(&operation.path())
            .map_err(|e| Error::InvalidUrl {
                url: format!("{}{}", self.base_url, operation.path()),
                reason: e.to_string(),
            })?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                operation: operation.name(),
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope = response.json().await?;
        Ok(envelope.data)
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Parses a configured endpoint and makes sure it points at the JSON API root.
///
/// `https://pve1:8006` and `https://pve1:8006/api2/json` both become
/// `https://pve1:8006/api2/json/`.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] for unparsable URLs, non-HTTP schemes and
/// URLs without a host.
pub fn normalize_base_url(endpoint: &str) -> Result<Url> {
    let invalid = |reason: String| Error::InvalidUrl {
        url: endpoint.to_string(),
        reason,
    };

    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty endpoint".to_string()));
    }

    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };

    let mut url = Url::parse(&with_slash).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    if !url.path().ends_with(API_PATH) {
        let path = format!("{}{API_PATH}", url.path());
        url.set_path(&path);
    }

    Ok(url)
}
