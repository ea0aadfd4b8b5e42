//! Blocking HTTP transport.

use std::sync::Arc;
use std::time::Duration;

use capstan_common::{CapstanError, CapstanResult};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;

use crate::credentials::Credentials;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

static SETTINGS: OnceCell<HttpSettings> = OnceCell::new();
static SHARED: OnceCell<Arc<dyn HttpTransport>> = OnceCell::new();

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// Timeout applied to every request.
    pub timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Status and body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Blocking GET/PUT used by file artifacts.
///
/// Implementations return `Ok` for every response the server produced,
/// whatever its status; connection failures and timeouts are
/// [`CapstanError::Retryable`].
pub trait HttpTransport: Send + Sync {
    /// GET `url` with query parameters.
    ///
    /// # Errors
    ///
    /// Fails if no response was received.
    fn get(&self, url: &str, query: &[(&str, &str)]) -> CapstanResult<HttpResponse>;

    /// PUT `body` to `url`, with basic auth when credentials are given.
    ///
    /// # Errors
    ///
    /// Fails if no response was received.
    fn put(
        &self,
        url: &str,
        body: Vec<u8>,
        credentials: Option<&Credentials>,
    ) -> CapstanResult<HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialised.
    pub fn new(settings: &HttpSettings) -> CapstanResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| CapstanError::config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn send(url: &str, request: reqwest::blocking::RequestBuilder) -> CapstanResult<HttpResponse> {
        let response = request
            .send()
            .map_err(|e| CapstanError::retryable(format!("Request to {url} failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| CapstanError::retryable(format!("Failed to read body of {url}: {e}")))?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, query: &[(&str, &str)]) -> CapstanResult<HttpResponse> {
        tracing::debug!(url = %url, ?query, "GET");
        Self::send(url, self.client.get(url).query(query))
    }

    fn put(
        &self,
        url: &str,
        body: Vec<u8>,
        credentials: Option<&Credentials>,
    ) -> CapstanResult<HttpResponse> {
        tracing::debug!(url = %url, bytes = body.len(), "PUT");
        let mut request = self.client.put(url).body(body);
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, creds.password.as_ref());
        }
        Self::send(url, request)
    }
}

/// Install settings for the shared transport.
///
/// Returns false if settings were already installed; they cannot change once
/// the transport is open.
pub fn configure_http(settings: HttpSettings) -> bool {
    SETTINGS.set(settings).is_ok()
}

/// The process-wide HTTP transport, opened on first use.
///
/// # Errors
///
/// Fails if the client cannot be created.
pub fn shared_http() -> CapstanResult<Arc<dyn HttpTransport>> {
    SHARED
        .get_or_try_init(|| {
            let settings = SETTINGS.get_or_init(HttpSettings::default);
            tracing::debug!(timeout = ?settings.timeout, "Opening HTTP transport");
            let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(settings)?);
            Ok(transport)
        })
        .cloned()
}
