//! Startup-time assembly of per-route handler chains.
//!
//! The dispatcher walks the route table once, in document order, resolving
//! every identity-service reference up front. Any failure aborts the whole
//! build so that the gateway never serves a partially valid table. The
//! resulting chains are mounted under `/api/<name>`:
//! * unprotected: `[ForwardingAdapter]`
//! * protected: `[AuthGate, ForwardingAdapter]`
use std::{sync::Arc, time::Duration};

use axum::{Router, middleware, routing::any};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::{
    config::models::{RouteEntry, RouteTable},
    core::{
        auth_gate::{AuthGate, authenticate},
        forwarding::{ForwardingAdapter, forward_request},
    },
    ports::http_client::HttpClient,
};

/// Path prefix every route is mounted under.
pub const API_PREFIX: &str = "/api";

static ROUTE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._~-]+$").expect("invalid route name regex"));

/// Startup-fatal errors found while building the chains.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("Route '{route}' has authentication enabled but no identity service defined")]
    MissingIdentityService { route: String },

    #[error("Identity service '{service}' referenced by route '{route}' is not defined")]
    UnresolvedIdentityService { route: String, service: String },

    #[error("Invalid upstream url '{url}' for route '{route}': {reason}")]
    InvalidUpstreamUrl {
        route: String,
        url: String,
        reason: String,
    },

    #[error("Invalid route name '{route}': only letters, digits, '-', '_', '.' and '~' are allowed")]
    InvalidRouteName { route: String },
}

/// One mounted chain: optional gate followed by the forwarder.
pub struct RegisteredRoute {
    name: String,
    prefix: String,
    auth_gate: Option<Arc<AuthGate>>,
    forwarder: Arc<ForwardingAdapter>,
}

impl RegisteredRoute {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mount point, `/api/<name>`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_protected(&self) -> bool {
        self.auth_gate.is_some()
    }

    pub fn identity_service(&self) -> Option<&str> {
        self.auth_gate.as_deref().map(AuthGate::identity_service)
    }

    pub fn forwarder(&self) -> &ForwardingAdapter {
        &self.forwarder
    }

    /// Mount this chain on `router`. All methods and sub-paths under the
    /// prefix reach the chain with the prefix stripped.
    pub fn mount(&self, router: Router) -> Router {
        let mut chain = any(forward_request).with_state(self.forwarder.clone());
        if let Some(gate) = &self.auth_gate {
            chain = chain.layer(middleware::from_fn_with_state(gate.clone(), authenticate));
        }
        router.nest_service(&self.prefix, chain)
    }
}

/// Builds and mounts the handler chain of every route entry.
pub struct Dispatcher {
    http_client: Arc<dyn HttpClient>,
    identity_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            identity_timeout: None,
        }
    }

    /// Bound every identity validation call. `None` keeps them unbounded.
    pub fn with_identity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.identity_timeout = timeout;
        self
    }

    /// Build one chain per entry, in table order. Fails on the first entry
    /// that cannot be resolved; nothing is returned in that case.
    pub fn build(&self, table: &RouteTable) -> Result<Vec<RegisteredRoute>, DispatchError> {
        table.iter().map(|entry| self.build_route(table, entry)).collect()
    }

    /// Build every chain and mount them on a fresh router.
    pub fn router(&self, table: &RouteTable) -> Result<Router, DispatchError> {
        let routes = self.build(table)?;
        Ok(routes
            .iter()
            .fold(Router::new(), |router, route| route.mount(router)))
    }

    fn build_route(
        &self,
        table: &RouteTable,
        entry: &RouteEntry,
    ) -> Result<RegisteredRoute, DispatchError> {
        if !ROUTE_NAME_PATTERN.is_match(&entry.name) {
            return Err(DispatchError::InvalidRouteName {
                route: entry.name.clone(),
            });
        }

        let invalid_url = |url: &str, reason: String| DispatchError::InvalidUpstreamUrl {
            route: entry.name.clone(),
            url: url.to_string(),
            reason,
        };

        let forwarder = ForwardingAdapter::new(entry, self.http_client.clone())
            .map_err(|e| invalid_url(&entry.url, e.to_string()))?;

        let auth_gate = if entry.auth_enabled() {
            let identity = self.resolve_identity(table, entry)?;
            tracing::info!(
                "Setting up proxy for {}/{} at {} with authentication service {}",
                API_PREFIX,
                entry.name,
                entry.url,
                identity.name
            );

            let gate = AuthGate::new(entry, identity, self.http_client.clone())
                .map_err(|e| invalid_url(&identity.url, e.to_string()))?
                .with_identity_timeout(self.identity_timeout);
            Some(Arc::new(gate))
        } else {
            tracing::info!(
                "Setting up proxy for {}/{} at {}",
                API_PREFIX,
                entry.name,
                entry.url
            );
            None
        };

        Ok(RegisteredRoute {
            name: entry.name.clone(),
            prefix: format!("{API_PREFIX}/{}", entry.name),
            auth_gate,
            forwarder: Arc::new(forwarder),
        })
    }

    fn resolve_identity<'t>(
        &self,
        table: &'t RouteTable,
        entry: &RouteEntry,
    ) -> Result<&'t RouteEntry, DispatchError> {
        let service = entry
            .identity_service()
            .ok_or_else(|| DispatchError::MissingIdentityService {
                route: entry.name.clone(),
            })?;

        let identity = table
            .get(service)
            .ok_or_else(|| DispatchError::UnresolvedIdentityService {
                route: entry.name.clone(),
                service: service.to_string(),
            })?;

        // Accepted as-is: the validation call goes straight to the identity
        // upstream, never back through this gateway.
        if identity.auth_enabled() {
            tracing::warn!(
                "Identity service '{}' used by route '{}' is itself protected{}",
                identity.name,
                entry.name,
                if identity.name == entry.name {
                    " (self-reference)"
                } else {
                    ""
                }
            );
        }

        Ok(identity)
    }
}
