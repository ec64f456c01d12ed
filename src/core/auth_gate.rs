//! Identity gate for protected routes.
//!
//! Every request to a protected route is validated by one `POST
//! {identity}/oidc/validate` call carrying the `id_token` and `client_id`
//! fields of the request body. Outcomes:
//! * no `Authorization` header: 401, identity service untouched
//! * identity answers 200: the chain continues with the body re-attached
//! * identity answers anything else: that status and body are mirrored
//! * identity call fails without a response: 500 with an empty body
//!
//! Outcomes are never cached; each gated request costs exactly one call.
use std::{sync::Arc, time::Duration};

use axum::{
    body::Body as AxumBody,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    adapters::http_client::read_limited,
    config::models::RouteEntry,
    core::forwarding::{InvalidUpstream, UpstreamTarget},
    ports::http_client::{HttpClient, HttpClientError, RelayOptions},
};

/// Path of the validation endpoint on the identity service.
pub const VALIDATE_PATH: &str = "/oidc/validate";

/// Credential fields picked out of the request body and sent for validation.
/// JSON values are passed through untouched; absent fields are omitted.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<serde_json::Value>,
}

impl ValidationRequest {
    /// Extract the credential fields from a JSON body. Anything that is not
    /// a JSON object yields an empty request.
    pub fn from_body(body: &[u8]) -> Self {
        let Ok(fields) = serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(body)
        else {
            return Self::default();
        };
        Self {
            id_token: fields.get("id_token").cloned(),
            client_id: fields.get("client_id").cloned(),
        }
    }
}

/// Per-request failures of the gate. Each one terminates the chain.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingCredential,

    /// The identity service answered with a non-200 status.
    #[error("credential rejected by identity service with status {status}")]
    CredentialRejected {
        status: StatusCode,
        content_type: Option<HeaderValue>,
        body: Bytes,
    },

    /// The identity call produced no usable response.
    #[error("identity service {url} unavailable: {source}")]
    IdentityServiceUnavailable {
        url: String,
        #[source]
        source: HttpClientError,
    },

    /// The request body could not be read within the route's limit.
    #[error("failed to read request body: {0}")]
    RequestBody(HttpClientError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingCredential => {
                (StatusCode::UNAUTHORIZED, "Missing authorization header").into_response()
            }
            Self::CredentialRejected {
                status,
                content_type,
                body,
            } => {
                let mut response = (status, body).into_response();
                match content_type {
                    Some(value) => {
                        response.headers_mut().insert(header::CONTENT_TYPE, value);
                    }
                    None => {
                        response.headers_mut().remove(header::CONTENT_TYPE);
                    }
                }
                response
            }
            Self::IdentityServiceUnavailable { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            Self::RequestBody(e) => e.into_response(),
        }
    }
}

/// Gate bound to one resolved identity service.
pub struct AuthGate {
    route: String,
    identity_service: String,
    identity: UpstreamTarget,
    request_size_limit: usize,
    identity_timeout: Option<Duration>,
    http_client: Arc<dyn HttpClient>,
}

impl AuthGate {
    /// Build the gate for `route`, validating against `identity`.
    pub fn new(
        route: &RouteEntry,
        identity: &RouteEntry,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self, InvalidUpstream> {
        Ok(Self {
            route: route.name.clone(),
            identity_service: identity.name.clone(),
            identity: UpstreamTarget::parse(&identity.url, identity.https)?,
            request_size_limit: route.request_size_limit.as_usize(),
            identity_timeout: None,
            http_client,
        })
    }

    /// Bound the identity call. `None` leaves it unbounded.
    pub fn with_identity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.identity_timeout = timeout;
        self
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn identity_service(&self) -> &str {
        &self.identity_service
    }

    /// Full URL of the validation endpoint.
    pub fn validate_url(&self) -> String {
        format!("{}{}", self.identity, VALIDATE_PATH)
    }

    /// Validate the request's credentials. On success the request is handed
    /// back with its body restored.
    pub async fn authorize(&self, req: Request<AxumBody>) -> Result<Request<AxumBody>, AuthError> {
        let has_credential = req
            .headers()
            .get(header::AUTHORIZATION)
            .is_some_and(|value| !value.is_empty());
        if !has_credential {
            tracing::debug!(route = %self.route, "Rejecting request without authorization header");
            return Err(AuthError::MissingCredential);
        }

        let (parts, body) = req.into_parts();
        let bytes = read_limited(body, self.request_size_limit)
            .await
            .map_err(AuthError::RequestBody)?;

        self.validate(&ValidationRequest::from_body(&bytes)).await?;

        Ok(hyper::Request::from_parts(parts, AxumBody::from(bytes)))
    }

    /// Issue the validation call and classify its outcome.
    pub async fn validate(&self, credentials: &ValidationRequest) -> Result<(), AuthError> {
        let url = self.validate_url();
        let unavailable = |source: HttpClientError| {
            tracing::error!(
                error = %source,
                identity_service = %url,
                "Error when validating token with identity service {}",
                url
            );
            AuthError::IdentityServiceUnavailable {
                url: url.clone(),
                source,
            }
        };

        let payload = serde_json::to_vec(credentials)
            .map_err(|e| unavailable(HttpClientError::InvalidRequest(e.to_string())))?;
        let uri = self.identity.uri_for(VALIDATE_PATH).map_err(&unavailable)?;
        let request = hyper::Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(payload))
            .map_err(|e| unavailable(HttpClientError::InvalidRequest(e.to_string())))?;

        let response = self
            .http_client
            .send_request(request, RelayOptions::new(None, self.identity_timeout))
            .await
            .map_err(&unavailable)?;

        let status = response.status();
        if status == StatusCode::OK {
            tracing::debug!(route = %self.route, identity_service = %self.identity_service, "Credentials accepted");
            return Ok(());
        }

        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = read_limited(response.into_body(), usize::MAX)
            .await
            .map_err(&unavailable)?;

        tracing::info!(
            route = %self.route,
            identity_service = %self.identity_service,
            status = status.as_u16(),
            "Credentials rejected by identity service"
        );
        Err(AuthError::CredentialRejected {
            status,
            content_type,
            body,
        })
    }
}

/// Axum middleware placed in front of the forwarding handler on protected
/// routes.
pub async fn authenticate(State(gate): State<Arc<AuthGate>>, req: Request, next: Next) -> Response {
    match gate.authorize(req).await {
        Ok(req) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::{Router, middleware, routing::any};
    use http_body_util::BodyExt;
    use hyper::Response as HyperResponse;
    use tower::ServiceExt;

    use super::*;
    use crate::ports::http_client::HttpClientResult;

    type Reply = Box<dyn Fn() -> HttpClientResult<HyperResponse<AxumBody>> + Send + Sync>;

    /// Identity client double that records each validation call.
    struct StubIdentity {
        calls: Mutex<Vec<(String, serde_json::Value)>>,
        reply: Reply,
    }

    impl StubIdentity {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                reply,
            })
        }

        fn responding(status: u16, body: &'static str) -> Arc<Self> {
            Self::new(Box::new(move || {
                Ok(HyperResponse::builder()
                    .status(status)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(AxumBody::from(body))
                    .unwrap())
            }))
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpClient for StubIdentity {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
            _options: RelayOptions,
        ) -> HttpClientResult<HyperResponse<AxumBody>> {
            let uri = req.uri().to_string();
            let body = req.into_body().collect().await.unwrap().to_bytes();
            let json = serde_json::from_slice(&body).unwrap();
            self.calls.lock().unwrap().push((uri, json));
            (self.reply)()
        }
    }

    fn gate(client: Arc<StubIdentity>) -> Arc<AuthGate> {
        let route = RouteEntry::new("users", "http://users:4000").with_identity_service("identity");
        let identity = RouteEntry::new("identity", "http://identity:5000");
        Arc::new(AuthGate::new(&route, &identity, client).unwrap())
    }

    /// Gate in front of a handler that echoes the request body.
    fn app(gate: Arc<AuthGate>) -> Router {
        Router::new()
            .route("/", any(|body: Bytes| async move { body }))
            .layer(middleware::from_fn_with_state(gate, authenticate))
    }

    fn credentialed_request(body: &'static str) -> Request<AxumBody> {
        hyper::Request::builder()
            .method("POST")
            .uri("/")
            .header(header::AUTHORIZATION, "Bearer abc")
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(body))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn test_validation_request_from_body() {
        let parsed = ValidationRequest::from_body(br#"{"id_token":"t","client_id":42,"x":1}"#);
        assert_eq!(parsed.id_token, Some(serde_json::json!("t")));
        assert_eq!(parsed.client_id, Some(serde_json::json!(42)));

        assert_eq!(ValidationRequest::from_body(b"not json"), ValidationRequest::default());
        assert_eq!(
            ValidationRequest::from_body(br#"["tok","cid"]"#),
            ValidationRequest::default()
        );
        assert_eq!(ValidationRequest::from_body(br#""tok""#), ValidationRequest::default());
        assert_eq!(
            serde_json::to_string(&ValidationRequest::default()).unwrap(),
            "{}"
        );
    }

    #[test]
    fn test_validate_url_targets_identity_service() {
        let stub = StubIdentity::responding(200, "{}");
        assert_eq!(gate(stub).validate_url(), "http://identity:5000/oidc/validate");
    }

    #[tokio::test]
    async fn test_missing_authorization_is_401_without_call() {
        let stub = StubIdentity::responding(200, "{}");
        let request = hyper::Request::builder()
            .method("POST")
            .uri("/")
            .body(AxumBody::from(r#"{"id_token":"t"}"#))
            .unwrap();

        let response = app(gate(stub.clone())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_bytes(response).await, "Missing authorization header");
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_authorization_is_401_without_call() {
        let stub = StubIdentity::responding(200, "{}");
        let request = hyper::Request::builder()
            .method("POST")
            .uri("/")
            .header(header::AUTHORIZATION, "")
            .body(AxumBody::from(r#"{"id_token":"t"}"#))
            .unwrap();

        let response = app(gate(stub.clone())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_bytes(response).await, "Missing authorization header");
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_accepted_credentials_continue_with_body_intact() {
        let stub = StubIdentity::responding(200, r#"{"valid":true}"#);
        let body = r#"{"id_token":"token-1","client_id":"web","payload":[1,2,3]}"#;

        let response = app(gate(stub.clone()))
            .oneshot(credentialed_request(body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, body);

        let calls = stub.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "http://identity:5000/oidc/validate");
        assert_eq!(
            calls[0].1,
            serde_json::json!({"id_token": "token-1", "client_id": "web"})
        );
    }

    #[tokio::test]
    async fn test_rejection_is_mirrored() {
        let stub = StubIdentity::responding(401, r#"{"error":"invalid_token"}"#);

        let response = app(gate(stub.clone()))
            .oneshot(credentialed_request(r#"{"id_token":"bad","client_id":"web"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(body_bytes(response).await, r#"{"error":"invalid_token"}"#);
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn test_non_200_success_status_is_still_rejection() {
        let stub = StubIdentity::responding(204, "");

        let response = app(gate(stub))
            .oneshot(credentialed_request("{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_unreachable_identity_is_500_with_empty_body() {
        let stub = StubIdentity::new(Box::new(|| {
            Err(HttpClientError::ConnectionError("connection refused".to_string()))
        }));

        let response = app(gate(stub.clone()))
            .oneshot(credentialed_request(r#"{"id_token":"t","client_id":"c"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_bytes(response).await.is_empty());
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_before_validation() {
        let stub = StubIdentity::responding(200, "{}");
        let route = RouteEntry::new("users", "http://users:4000")
            .with_identity_service("identity")
            .with_request_size_limit(crate::config::RequestSizeLimit::from_bytes(8));
        let identity = RouteEntry::new("identity", "http://identity:5000");
        let gate = Arc::new(AuthGate::new(&route, &identity, stub.clone()).unwrap());

        let response = app(gate)
            .oneshot(credentialed_request(r#"{"id_token":"far too long"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(stub.call_count(), 0);
    }
}
