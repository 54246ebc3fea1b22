//! Request/response collaborator used to reach the remote assembler.
//!
//! The sync engine never talks HTTP directly. It hands a [`TransportRequest`]
//! to a [`Transport`] and gets a status plus body back, which keeps signing,
//! auth and retry policy of the proxy outside this crate. [`HttpTransport`]
//! is the plain `reqwest` implementation.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::protocol::{query_pairs, Method, Operation};

/// One call to the proxy.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method
    pub method: Method,
    /// Route relative to the service base URL
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Request body
    pub body: Option<Vec<u8>>,
    /// Extra headers
    pub headers: Vec<(String, String)>,
}

impl TransportRequest {
    /// Request for `operation` with no parameters.
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self {
            method: operation.method(),
            path: operation.path().to_string(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
        }
    }

    /// Set query parameters from a flat struct.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the value is not a flat struct.
    pub fn with_query<T: Serialize>(mut self, query: &T) -> Result<Self> {
        self.query = query_pairs(query)?;
        Ok(self)
    }

    /// Attach a raw octet-stream body.
    #[must_use]
    pub fn with_bytes(mut self, body: Vec<u8>) -> Self {
        self.headers
            .push(("content-type".to_string(), "application/octet-stream".to_string()));
        self.body = Some(body);
        self
    }

    /// Attach a JSON body.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the value cannot be encoded.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self)
    }
}

/// What came back from the proxy.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub data: Vec<u8>,
}

impl TransportResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the body is not the expected JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.data)
            .map_err(|e| Error::ProtocolError(format!("unexpected response body: {e}")))
    }

    /// Error message carried by a non-success body, if any.
    #[must_use]
    pub fn error_message(&self) -> String {
        #[derive(serde::Deserialize)]
        struct Body {
            message: String,
        }

        serde_json::from_slice::<Body>(&self.data).map_or_else(
            |_| String::from_utf8_lossy(&self.data).trim().to_string(),
            |body| body.message,
        )
    }
}

/// Sends requests to the remote assembler.
///
/// Implementations must be safe to call concurrently; the upload coordinator
/// keeps several requests in flight at once.
pub trait Transport: Send + Sync {
    /// Perform one request.
    ///
    /// Non-2xx statuses are returned as responses, not errors. Errors are
    /// reserved for requests that produced no response at all.
    fn request(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse>> + Send;
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    fn request(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse>> + Send {
        (**self).request(request)
    }
}

/// [`Transport`] over HTTP(S) with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the service rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the URL is not http(s), or `Internal` if the
    /// HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = reqwest::Url::parse(base_url).map_err(|e| Error::InvalidConfig {
            key: "endpoint".to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig {
                key: "endpoint".to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nas-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Absolute URL for a route.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Transport for HttpTransport {
    fn request(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse>> + Send {
        let url = self.url_for(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let timeout_secs = self.timeout.as_secs();

        async move {
            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(timeout_secs)
                } else {
                    Error::Transport(format!("{url}: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let data = response
                .bytes()
                .await
                .map_err(|e| Error::Transport(format!("failed to read response body: {e}")))?
                .to_vec();

            tracing::trace!(%url, status, bytes = data.len(), "Proxy response");
            Ok(TransportResponse { status, data })
        }
    }
}
