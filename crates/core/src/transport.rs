//! The transport seam: one POST of a wire request, one raw response back.
//!
//! [`HttpTransport`] is the production implementation over a blocking `reqwest`
//! client. Tests substitute a scripted [`Transport`].

use ihe_wire::WireRequest;
use reqwest::header::CONTENT_TYPE;
use std::error::Error as _;
use std::time::Duration;

/// Raw bytes received from an endpoint, whatever the HTTP status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network-level failure of one attempt.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportFailure {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("TLS or certificate failure: {0}")]
    Tls(String),
    #[error("HTTP status {status}: {excerpt}")]
    HttpStatus { status: u16, excerpt: String },
    #[error("transport error: {0}")]
    Other(String),
}

/// Sends one request to one endpoint.
///
/// Implementations return every received response, including non-2xx ones, so the
/// engine can audit the bytes before deciding how to classify them.
pub trait Transport {
    fn send(
        &self,
        endpoint: &str,
        request: &WireRequest,
        timeout: Duration,
    ) -> Result<RawResponse, TransportFailure>;
}

/// Blocking HTTP transport. The client's connection pool is owned for the
/// lifetime of the batch and released when the transport is dropped.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Builds the client. `pool_max_idle_per_host` only tunes connection reuse.
    pub fn new(pool_max_idle_per_host: usize) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .pool_max_idle_per_host(pool_max_idle_per_host)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        endpoint: &str,
        request: &WireRequest,
        timeout: Duration,
    ) -> Result<RawResponse, TransportFailure> {
        let response = self
            .client
            .post(endpoint)
            .timeout(timeout)
            .header(CONTENT_TYPE, request.content_type.as_str())
            .header("SOAPAction", request.action)
            .body(request.body.clone())
            .send()
            .map_err(|e| failure_from_reqwest(&e, timeout))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .map_err(|e| failure_from_reqwest(&e, timeout))?
            .to_vec();

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

fn failure_from_reqwest(error: &reqwest::Error, timeout: Duration) -> TransportFailure {
    let chain = error_chain(error);
    if error.is_timeout() {
        TransportFailure::Timeout(timeout)
    } else if looks_like_tls(&chain) {
        TransportFailure::Tls(chain)
    } else if error.is_connect() {
        TransportFailure::Connect(chain)
    } else {
        TransportFailure::Other(chain)
    }
}

/// Joins an error and its sources into one line; rustls reports certificate
/// problems only in the innermost source.
fn error_chain(error: &reqwest::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

fn looks_like_tls(chain: &str) -> bool {
    let lower = chain.to_ascii_lowercase();
    ["certificate", "tls", "ssl", "handshake", "unknownissuer"]
        .iter()
        .any(|needle| lower.contains(needle))
}
