//! Builds the complete application from settings.
use std::{sync::Arc, time::Duration};

use axum::Router;
use eyre::{Result, WrapErr};
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    adapters::{
        FileSystemAdapter, HEALTH_PATH, HttpClientAdapter, HttpHandler, ProxyHandler,
        build_router, middleware::GlobalRateLimit,
    },
    config::{
        loader::load_proxy_rules, models::PluginConfig, settings::ServerSettings,
    },
    core::{
        GatewayService,
        plugin::{PluginLoadError, PluginLoadReport, PluginRecord, PluginRegistry},
        rate_limiter::{ClientRateLimiter, RateLimitTier},
    },
    ports::{http_client::HttpClient, proxy_observer::ProxyObserver},
    utils::graceful_shutdown::ShutdownReason,
};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A fully wired server, ready to be served.
pub struct Application {
    pub router: Router,
    pub plugin_config: Arc<PluginConfig>,
    pub plugins_loaded: Vec<PluginRecord>,
    pub plugins_failed: Vec<PluginLoadError>,
    pub gateway: Arc<GatewayService>,
    pub global_limiter: Option<Arc<ClientRateLimiter>>,
}

/// Inputs beyond [`ServerSettings`] an embedder may supply.
pub struct ApplicationParts {
    pub plugins: PluginRegistry,
    pub observers: Vec<Arc<dyn ProxyObserver>>,
    /// Upstream client; the hyper/rustls adapter when `None`.
    pub http_client: Option<Arc<dyn HttpClient>>,
}

impl Default for ApplicationParts {
    fn default() -> Self {
        Self {
            plugins: crate::plugins::builtin(),
            observers: Vec::new(),
            http_client: None,
        }
    }
}

pub async fn build_application(
    settings: &ServerSettings,
    parts: ApplicationParts,
) -> Result<Application> {
    let ApplicationParts {
        mut plugins,
        observers,
        http_client,
    } = parts;

    let plugin_config = Arc::new(settings.plugin_config()?);
    tracing::info!(
        static_path = %plugin_config.static_path.display(),
        port = plugin_config.port,
        "Resolved plugin configuration"
    );

    plugins.reserve_path(HEALTH_PATH);
    for name in &settings.plugins.disabled {
        plugins.exclude(name.clone());
    }
    let PluginLoadReport {
        router: plugin_routes,
        loaded,
        failed,
    } = plugins.load_all(&plugin_config).await;

    let proxy_config_path = plugin_config.resolved_proxy_config_path();
    let gateway = match load_proxy_rules(Some(&proxy_config_path)).await {
        Some(entries) => GatewayService::from_entries(&entries),
        None => GatewayService::default(),
    };
    let gateway = Arc::new(gateway);
    tracing::info!(rules = gateway.route_count(), "Proxy rules active");

    let global_limiter = if settings.global_rate_limit.enabled {
        let limiter = ClientRateLimiter::new(&settings.global_rate_limit, RateLimitTier::Global)
            .wrap_err("Invalid global rate limit settings")?;
        Some(Arc::new(limiter))
    } else {
        tracing::warn!("Global rate limit disabled");
        None
    };

    let http_client: Arc<dyn HttpClient> = match http_client {
        Some(client) => client,
        None => Arc::new(HttpClientAdapter::new().wrap_err("Failed to create upstream client")?),
    };
    let proxy = observers
        .into_iter()
        .fold(
            ProxyHandler::new(http_client).trust_proxy(settings.trust_proxy),
            ProxyHandler::with_observer,
        );

    let mut file_system =
        FileSystemAdapter::new(plugin_config.static_path.clone()).hide(&proxy_config_path);
    if let Some(settings_file) = &settings.settings_file {
        file_system = file_system.hide(settings_file);
    }

    let handler = HttpHandler::new(gateway.clone(), Arc::new(proxy), Arc::new(file_system));

    let router = build_router(
        handler,
        plugin_routes,
        GlobalRateLimit {
            limiter: global_limiter.clone(),
            trust_proxy: settings.trust_proxy,
        },
    );

    Ok(Application {
        router,
        plugin_config,
        plugins_loaded: loaded,
        plugins_failed: failed,
        gateway,
        global_limiter,
    })
}

impl Application {
    /// Smallest window among all limiters, bounded below by one second.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.global_limiter
            .iter()
            .chain(self.gateway.routes().iter().filter_map(|r| r.limiter.as_ref()))
            .map(|limiter| limiter.settings().window())
            .min()
            .map(|window| window.max(MIN_SWEEP_INTERVAL))
    }

    /// Periodically drop expired client entries until shutdown.
    pub fn spawn_limiter_sweeper(
        &self,
        mut shutdown: broadcast::Receiver<ShutdownReason>,
    ) -> Option<JoinHandle<()>> {
        let interval = self.sweep_interval()?;
        let global = self.global_limiter.clone();
        let gateway = self.gateway.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut purged = gateway.purge_expired().await;
                        if let Some(global) = &global {
                            purged += global.purge_expired().await;
                        }
                        if purged > 0 {
                            tracing::debug!(purged, "Purged expired rate-limit entries");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Rate-limit sweeper stopping");
                        break;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{models::RateLimitSettings, settings::SettingsOverrides};

    fn settings(static_dir: &std::path::Path) -> ServerSettings {
        ServerSettings::load_from(
            &SettingsOverrides {
                static_dir: Some(static_dir.to_string_lossy().into_owned()),
                ..SettingsOverrides::default()
            },
            Default::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_without_proxy_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = build_application(&settings(dir.path()), ApplicationParts::default())
            .await
            .unwrap();
        assert_eq!(app.plugins_loaded.len(), 2);
        assert!(app.gateway.is_empty());
        assert!(app.global_limiter.is_some());
        assert_eq!(app.sweep_interval(), Some(Duration::from_millis(900_000)));
    }

    #[tokio::test]
    async fn test_disabled_plugins_and_global_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut settings = settings(dir.path());
        settings.plugins.disabled = vec!["hello".to_string()];
        settings.global_rate_limit = RateLimitSettings {
            enabled: false,
            ..RateLimitSettings::global_default()
        };

        let app = build_application(&settings, ApplicationParts::default())
            .await
            .unwrap();
        assert_eq!(app.plugins_loaded.len(), 1);
        assert_eq!(app.plugins_loaded[0].name, "app-config");
        assert!(app.global_limiter.is_none());
        assert_eq!(app.sweep_interval(), None);
    }

    #[tokio::test]
    async fn test_invalid_global_limit_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut settings = settings(dir.path());
        settings.global_rate_limit.max = 0;
        assert!(
            build_application(&settings, ApplicationParts::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = build_application(&settings(dir.path()), ApplicationParts::default())
            .await
            .unwrap();
        let (tx, rx) = broadcast::channel(1);
        let handle = app.spawn_limiter_sweeper(rx).unwrap();
        tx.send(ShutdownReason::Graceful).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
