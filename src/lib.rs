//! Portico - a static-asset front door with plugin routes and rate-limited
//! reverse-proxy rules.
//!
//! Every inbound request is resolved in a fixed order:
//! 1. the global rate limiter (every request, keyed by client identity)
//! 2. `GET /health`
//! 3. routes contributed by plugins, loaded in lexicographic name order
//! 4. proxy rules from `proxy.config.json`, first match in document order, each
//!    behind its own rate limiter
//! 5. files from the static directory
//! 6. the SPA entry document (`index.html`) for any other `GET`/`HEAD`
//!
//! # Quick Example
//! ```no_run
//! use portico::{ApplicationParts, ServerSettings, SettingsOverrides, build_application};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let settings = ServerSettings::load(&SettingsOverrides::default())?;
//! let app = build_application(&settings, ApplicationParts::default()).await?;
//! let listener = tokio::net::TcpListener::bind(settings.listen_addr()).await?;
//! axum::serve(
//!     listener,
//!     app.router
//!         .into_make_service_with_connect_info::<std::net::SocketAddr>(),
//! )
//! .await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Ports (traits) live in `ports`, their implementations in `adapters`, and the
//! routing/limiting/plugin logic in `core`.
pub mod bootstrap;
pub mod config;
pub mod plugins;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{FileSystemAdapter, HttpClientAdapter, HttpHandler, LoggingObserver, ProxyHandler},
    bootstrap::{Application, ApplicationParts, build_application},
    config::{ServerSettings, SettingsOverrides},
    core::{GatewayService, Plugin, PluginRegistry, PluginRoutes},
    ports::{
        http_client::HttpClient,
        proxy_observer::{ProxyContext, ProxyObserver},
    },
    utils::{ClientIdentity, GracefulShutdown},
};
