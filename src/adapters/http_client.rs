use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use bytes::Bytes;
use eyre::Result;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult, RelayOptions};

/// HTTP client adapter using Hyper with Rustls. This is the forwarding
/// primitive used for upstream relays and identity validation calls.
///
/// Responsibilities:
/// * Rewrites `Host` to the target authority
/// * Enforces the request body limit before anything is sent upstream
/// * Bounds the wait for response headers by the per-call timeout
/// * Converts between Hyper body and Axum body types
///
/// There are no retries or fallbacks.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::info!("Created upstream HTTP client (http and https)");
        Ok(Self { client })
    }

    /// Point the `Host` header at the target authority.
    fn set_host_header(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        let Some(host_str) = req.uri().host() else {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        };

        let host = match req.uri().port() {
            Some(port) => format!("{host_str}:{}", port.as_u16()),
            None => host_str.to_string(),
        };
        let value = HeaderValue::from_str(&host)
            .map_err(|e| HttpClientError::InvalidRequest(format!("Invalid host '{host}': {e}")))?;
        req.headers_mut().insert(header::HOST, value);
        Ok(())
    }

    /// Buffer the request body, failing as soon as it grows past `limit`.
    ///
    /// A declared `Content-Length` above the limit is rejected without
    /// reading the body at all.
    async fn buffer_body(req: Request<AxumBody>, limit: usize) -> HttpClientResult<Request<AxumBody>> {
        let declared = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > limit as u64) {
            return Err(HttpClientError::PayloadTooLarge { limit });
        }

        let (mut parts, body) = req.into_parts();
        let bytes = read_limited(body, limit).await?;

        parts.headers.remove(header::TRANSFER_ENCODING);
        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        Ok(Request::from_parts(parts, AxumBody::from(bytes)))
    }
}

/// Collect `body` into memory, rejecting it once it exceeds `limit` bytes.
pub async fn read_limited(body: AxumBody, limit: usize) -> HttpClientResult<Bytes> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(HttpClientError::PayloadTooLarge { limit })
        }
        Err(e) => Err(HttpClientError::BodyError(e.to_string())),
    }
}

impl HttpClientAdapter {
    /// Send the prepared request, waiting at most `limit` for the response
    /// headers. Runs inside the caller's `upstream_request` span.
    async fn dispatch(
        &self,
        req: Request<AxumBody>,
        limit: Option<Duration>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let (mut parts, axum_body) = req.into_parts();
        parts.version = Version::HTTP_11;

        tracing::debug!("Sending request: {} {}", parts.method, parts.uri);
        tracing::trace!("Outgoing request headers: {:?}", parts.headers);

        let method_for_error_log = parts.method.clone();
        let uri_for_error_log = parts.uri.clone();
        let outgoing_request = Request::from_parts(parts, axum_body);

        let pending = self.client.request(outgoing_request);
        let result = match limit {
            Some(limit) => match timeout(limit, pending).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::Span::current().record("http.status_code", 504u16);
                    tracing::warn!(
                        "Request to {} {} timed out after {:?}",
                        method_for_error_log,
                        uri_for_error_log,
                        limit
                    );
                    return Err(HttpClientError::Timeout(limit));
                }
            },
            None => pending.await,
        };

        match result {
            Ok(response) => {
                tracing::Span::current().record("http.status_code", response.status().as_u16());

                let (mut parts, hyper_body) = response.into_parts();

                // The downstream server (Axum) re-frames the streamed body.
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(e) => {
                tracing::Span::current().record("http.status_code", 599u16);
                tracing::error!(
                    "Error making request to upstream ({} {}): {}",
                    method_for_error_log,
                    uri_for_error_log,
                    e
                );

                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method_for_error_log} {uri_for_error_log} failed: {e}"
                )))
            }
        }
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
        options: RelayOptions,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::set_host_header(&mut req)?;

        if let Some(limit) = options.request_size_limit {
            req = Self::buffer_body(req, limit).await?;
        }

        let backend_identifier = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            req.uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        let span = tracing::info_span!(
            "upstream_request",
            upstream.url = %backend_identifier,
            http.method = %req.method(),
            http.path = %req.uri().path(),
            http.status_code = tracing::field::Empty,
        );

        self.dispatch(req, options.timeout).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{Router, routing::any};

    use super::*;

    async fn spawn_backend(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    async fn closed_port() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_http_client_creation() {
        let client = HttpClientAdapter::new();
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_set_host_header() {
        let mut req = Request::builder()
            .uri("http://upstream.internal:8081/path")
            .header(header::HOST, "gateway.example.com")
            .body(AxumBody::empty())
            .unwrap();

        HttpClientAdapter::set_host_header(&mut req).unwrap();
        assert_eq!(
            req.headers().get(header::HOST).unwrap(),
            HeaderValue::from_static("upstream.internal:8081")
        );
    }

    #[tokio::test]
    async fn test_relative_uri_is_invalid() {
        let client = HttpClientAdapter::new().unwrap();
        let req = Request::builder()
            .uri("/no-host")
            .body(AxumBody::empty())
            .unwrap();

        let err = client
            .send_request(req, RelayOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_declared_oversize_body_rejected_before_connecting() {
        let client = HttpClientAdapter::new().unwrap();
        let addr = closed_port().await;
        let req = Request::builder()
            .method("POST")
            .uri(format!("http://{addr}/upload"))
            .header(header::CONTENT_LENGTH, "64")
            .body(AxumBody::from(vec![0u8; 64]))
            .unwrap();

        let err = client
            .send_request(req, RelayOptions::new(Some(16), None))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpClientError::PayloadTooLarge { limit: 16 }));
    }

    #[tokio::test]
    async fn test_streamed_oversize_body_rejected() {
        let err = read_limited(AxumBody::from(vec![1u8; 32]), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpClientError::PayloadTooLarge { limit: 8 }));

        let ok = read_limited(AxumBody::from("small"), 8).await.unwrap();
        assert_eq!(ok, Bytes::from_static(b"small"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        let client = HttpClientAdapter::new().unwrap();
        let addr = closed_port().await;
        let req = Request::builder()
            .uri(format!("http://{addr}/"))
            .body(AxumBody::empty())
            .unwrap();

        let err = client
            .send_request(req, RelayOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpClientError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let addr = spawn_backend(Router::new().route(
            "/slow",
            any(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        ))
        .await;

        let client = HttpClientAdapter::new().unwrap();
        let req = Request::builder()
            .uri(format!("http://{addr}/slow"))
            .body(AxumBody::empty())
            .unwrap();

        let err = client
            .send_request(req, RelayOptions::new(None, Some(Duration::from_millis(100))))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpClientError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_relays_body_within_limit() {
        let addr = spawn_backend(Router::new().route(
            "/echo",
            any(|body: Bytes| async move { body }),
        ))
        .await;

        let client = HttpClientAdapter::new().unwrap();
        let req = Request::builder()
            .method("POST")
            .uri(format!("http://{addr}/echo"))
            .body(AxumBody::from("payload"))
            .unwrap();

        let response = client
            .send_request(req, RelayOptions::new(Some(1024), None))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"payload"));
    }
}
