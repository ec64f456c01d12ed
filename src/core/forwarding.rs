//! Forwarding adapter: binds one route's upstream settings to the
//! forwarding primitive.
use std::{fmt, sync::Arc, time::Duration};

use axum::{
    body::Body as AxumBody,
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use hyper::Uri;
use thiserror::Error;
use url::Url;

use crate::{
    config::models::RouteEntry,
    ports::http_client::{HttpClient, HttpClientError, RelayOptions},
};

/// Why an upstream URL could not be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct InvalidUpstream(String);

/// Scheme, authority and base path of an upstream, ready to be joined with a
/// request sub-path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    scheme: &'static str,
    authority: String,
    base_path: String,
}

impl UpstreamTarget {
    /// Parse `raw`, reading a URL without scheme as `http://…`. With
    /// `force_tls` the scheme is always `https`.
    pub fn parse(raw: &str, force_tls: bool) -> Result<Self, InvalidUpstream> {
        let raw = raw.trim();
        let candidate = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };

        let url = Url::parse(&candidate).map_err(|e| InvalidUpstream(e.to_string()))?;
        let scheme = match (url.scheme(), force_tls) {
            ("https", _) | ("http", true) => "https",
            ("http", false) => "http",
            (other, _) => {
                return Err(InvalidUpstream(format!(
                    "unsupported scheme '{other}', expected http or https"
                )));
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| InvalidUpstream("missing host".to_string()))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self {
            scheme,
            authority,
            base_path: url.path().trim_end_matches('/').to_string(),
        })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }

    /// Join `path_and_query` (e.g. `/users/7?expand=1`) onto the upstream.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, HttpClientError> {
        let suffix = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{path_and_query}")
        };
        format!("{}://{}{}{}", self.scheme, self.authority, self.base_path, suffix)
            .parse()
            .map_err(|e| HttpClientError::InvalidRequest(format!("Invalid upstream URI: {e}")))
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.base_path)
    }
}

/// Relays requests for one route to its upstream with the route's size limit
/// and timeout. Primitive failures become the response as-is; there is no
/// retry or fallback.
pub struct ForwardingAdapter {
    route: String,
    upstream: UpstreamTarget,
    options: RelayOptions,
    http_client: Arc<dyn HttpClient>,
}

impl ForwardingAdapter {
    pub fn new(entry: &RouteEntry, http_client: Arc<dyn HttpClient>) -> Result<Self, InvalidUpstream> {
        let upstream = UpstreamTarget::parse(&entry.url, entry.https)?;
        let options = RelayOptions::new(
            Some(entry.request_size_limit.as_usize()),
            entry.timeout.map(Duration::from_millis),
        );

        Ok(Self {
            route: entry.name.clone(),
            upstream,
            options,
            http_client,
        })
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn upstream(&self) -> &UpstreamTarget {
        &self.upstream
    }

    pub fn options(&self) -> RelayOptions {
        self.options
    }

    /// Forward a request whose URI has already had the route prefix removed.
    pub async fn forward(&self, mut req: Request<AxumBody>) -> Response {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();

        let target = match self.upstream.uri_for(&path_and_query) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(route = %self.route, "Failed to build upstream URI: {}", e);
                return e.into_response();
            }
        };

        tracing::debug!(route = %self.route, "Forwarding {} {} to {}", req.method(), path_and_query, target);
        *req.uri_mut() = target;

        match self.http_client.send_request(req, self.options).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(route = %self.route, upstream = %self.upstream, "Forwarding failed: {}", e);
                e.into_response()
            }
        }
    }
}

/// Axum handler at the end of every route chain.
pub async fn forward_request(
    State(forwarder): State<Arc<ForwardingAdapter>>,
    req: Request,
) -> Response {
    forwarder.forward(req).await
}
