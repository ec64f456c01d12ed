use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body as AxumBody,
    response::{IntoResponse, Response as AxumResponse},
};
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

/// Per-call settings honoured by the forwarding primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOptions {
    /// Maximum request body size in bytes. `None` disables the check.
    pub request_size_limit: Option<usize>,
    /// How long to wait for the response headers. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl RelayOptions {
    /// A zero timeout means no timeout.
    pub fn new(request_size_limit: Option<usize>, timeout: Option<Duration>) -> Self {
        Self {
            request_size_limit,
            timeout: timeout.filter(|t| !t.is_zero()),
        }
    }
}

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when request times out
    #[error("Timeout error after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// Request body larger than the configured limit
    #[error("Request body exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Error while reading a body
    #[error("Body error: {0}")]
    BodyError(String),
}

impl HttpClientError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BodyError(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for HttpClientError {
    fn into_response(self) -> AxumResponse {
        let status = self.status_code();
        let body = match &self {
            Self::ConnectionError(_) => "Upstream unavailable".to_string(),
            Self::Timeout(duration) => {
                format!("Upstream timed out after {} ms", duration.as_millis())
            }
            Self::PayloadTooLarge { .. } => "Request entity too large".to_string(),
            Self::InvalidRequest(_) => "Internal Server Error".to_string(),
            Self::BodyError(_) => "Failed to read request body".to_string(),
        };
        (status, body).into_response()
    }
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient is the port for the forwarding primitive: it relays a fully
/// addressed request to its target and hands back the response.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request whose URI already points at the target.
    ///
    /// # Arguments
    /// * `req` - The HTTP request to relay
    /// * `options` - Size limit and timeout for this call
    ///
    /// # Returns
    /// The target's response, whatever its status, or a transport error
    async fn send_request(
        &self,
        req: Request<AxumBody>,
        options: RelayOptions,
    ) -> HttpClientResult<Response<AxumBody>>;
}
