//! Request/response transport over HTTP.
//!
//! # Responsibilities
//! - Define the single-attempt seam the retry loop drives (`HttpTransport`)
//! - POST JSON envelopes with reqwest
//! - Map transport errors to connect/timeout failures without interpreting status codes

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use url::Url;

use crate::envelope::Envelope;
use crate::error::DeliveryResult;
use crate::resilience::circuit_breaker::destination_key;

/// Header carrying the envelope id so peers can deduplicate before parsing the body.
pub const MESSAGE_ID_HEADER: &str = "x-message-id";

/// One logical request, replayed unchanged on every attempt.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: Url,
    pub body: Vec<u8>,
    pub message_id: Option<String>,
}

impl OutboundRequest {
    /// Serialize `envelope` as the JSON body of a POST to `url`.
    pub fn for_envelope(url: Url, envelope: &Envelope) -> DeliveryResult<Self> {
        Ok(Self {
            url,
            body: serde_json::to_vec(envelope)?,
            message_id: Some(envelope.id.clone()),
        })
    }

    /// Key of the circuit breaker guarding this request's destination.
    pub fn destination(&self) -> String {
        destination_key(&self.url)
    }
}

/// A response that reached us, whatever its status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Raw `Retry-After` value, if present and valid UTF-8.
    pub fn retry_after(&self) -> Option<&str> {
        self.headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failure before any response was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// Could not connect, or the connection broke mid-exchange.
    Connect(String),
    /// The attempt exceeded its deadline.
    Timeout,
    /// Request could not be built or sent for a reason retrying will not fix.
    Fatal(String),
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Connect(cause) => write!(f, "connection error: {}", cause),
            TransportFailure::Timeout => write!(f, "timed out"),
            TransportFailure::Fatal(cause) => write!(f, "request error: {}", cause),
        }
    }
}

/// Executes exactly one attempt. Status codes are returned, never turned into errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &OutboundRequest) -> Result<HttpResponse, TransportFailure>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a client with the given connect timeout.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self::new(client))
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &OutboundRequest) -> Result<HttpResponse, TransportFailure> {
        let mut builder = self
            .client
            .post(request.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(request.body.clone());
        if let Some(id) = &request.message_id {
            builder = builder.header(MESSAGE_ID_HEADER, id);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(classify_reqwest_error)?
            .to_vec();

        Ok(HttpResponse { status, headers, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransportFailure::Connect(err.to_string())
    } else if err.is_builder() {
        TransportFailure::Fatal(err.to_string())
    } else {
        TransportFailure::Connect(err.to_string())
    }
}
