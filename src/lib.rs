//! Tollgate - an API gateway that mounts backend services under `/api/<name>`.
//!
//! Every route in `gateway-config.json` is relayed to its upstream with a
//! per-route body size limit, timeout and transport scheme. Routes with
//! authentication enabled first pass through an auth gate that validates the
//! caller's `Authorization` token against an identity service, itself one of
//! the configured routes, via `POST {identity}/oidc/validate`.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use tollgate::{ConfigProvider, Dispatcher, FileConfigProvider, HttpClientAdapter};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let table = FileConfigProvider::new("./config").load_config().await?;
//! let client = Arc::new(HttpClientAdapter::new()?);
//! let app = Dispatcher::new(client).router(&table)?;
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping the gateway logic inside `core`:
//! * `config` - route table model, loader and process settings
//! * `ports` - `HttpClient` (forwarding primitive) and `ConfigProvider`
//! * `adapters` - hyper/rustls client and the file-backed config provider
//! * `core` - `Dispatcher`, `AuthGate` and `ForwardingAdapter`
//!
//! # Error Handling
//! Startup paths return `eyre::Result<T>` or a domain error (`ConfigError`,
//! `DispatchError`); any of them is fatal before the listener is bound.
//! Request-path errors render themselves as HTTP responses.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{FileConfigProvider, HttpClientAdapter},
    config::{ConfigError, GatewaySettings, LogFormat, RouteEntry, RouteTable},
    core::{AuthGate, DispatchError, Dispatcher, ForwardingAdapter, RegisteredRoute},
    ports::{config_provider::ConfigProvider, http_client::HttpClient},
    utils::GracefulShutdown,
};
