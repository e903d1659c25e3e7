//! Plugin contract and the registry that loads plugins in a deterministic order.
//!
//! A plugin is anything implementing [`Plugin`]: it receives a [`PluginRoutes`] handle
//! and the shared [`PluginConfig`] and registers its routes. The registry invokes
//! plugins one at a time, sorted by name, so route precedence between plugins is
//! reproducible. A plugin that returns an error or panics is logged and skipped; the
//! remaining plugins still load and the failed plugin contributes no routes.
use std::{
    any::Any,
    collections::BTreeSet,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use async_trait::async_trait;
use axum::{Router, routing::MethodRouter};
use futures_util::FutureExt;
use thiserror::Error;

use crate::config::models::PluginConfig;

/// A unit of route-registration logic.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable name; determines load order and is used for `plugins.disabled`.
    fn name(&self) -> &str;

    /// Where the implementation lives, for reporting.
    fn source(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Register routes. May await (e.g. to read files) before returning.
    async fn register(
        &self,
        routes: &mut PluginRoutes,
        config: &Arc<PluginConfig>,
    ) -> eyre::Result<()>;
}

/// A successfully loaded plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRecord {
    pub name: String,
    pub source: String,
    /// Paths the plugin ended up owning.
    pub paths: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PluginLoadError {
    #[error("Plugin '{name}' failed to register: {message}")]
    Failed { name: String, message: String },

    #[error("Plugin '{name}' panicked while registering: {message}")]
    Panicked { name: String, message: String },

    #[error("Plugin '{name}' routes conflict with earlier routes: {message}")]
    RouteConflict { name: String, message: String },
}

impl PluginLoadError {
    pub fn plugin_name(&self) -> &str {
        match self {
            PluginLoadError::Failed { name, .. }
            | PluginLoadError::Panicked { name, .. }
            | PluginLoadError::RouteConflict { name, .. } => name,
        }
    }
}

/// Route handle given to a plugin during registration.
///
/// Paths already owned by the server or by an earlier plugin are skipped with a
/// warning: the first registration of a path wins.
pub struct PluginRoutes {
    plugin: String,
    router: Router,
    claimed: BTreeSet<String>,
    added: Vec<String>,
    skipped: Vec<String>,
}

impl PluginRoutes {
    fn new(plugin: &str, claimed: BTreeSet<String>) -> Self {
        Self {
            plugin: plugin.to_string(),
            router: Router::new(),
            claimed,
            added: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Register `method_router` at `path` (axum path syntax, e.g. `/api/items/{id}`).
    pub fn route(&mut self, path: &str, method_router: MethodRouter) -> &mut Self {
        if !path.starts_with('/') {
            tracing::warn!(plugin = %self.plugin, path, "Ignoring plugin route: path must start with '/'");
            self.skipped.push(path.to_string());
            return self;
        }
        if !self.claimed.insert(path.to_string()) {
            tracing::warn!(plugin = %self.plugin, path, "Ignoring plugin route: path already registered");
            self.skipped.push(path.to_string());
            return self;
        }

        let router = std::mem::take(&mut self.router);
        self.router = router.route(path, method_router);
        self.added.push(path.to_string());
        self
    }

    /// Paths registered so far by this plugin.
    pub fn paths(&self) -> &[String] {
        &self.added
    }

    /// Paths this plugin asked for but did not get.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }
}

/// Outcome of [`PluginRegistry::load_all`].
pub struct PluginLoadReport {
    /// Routes of every successfully loaded plugin, in load order.
    pub router: Router,
    pub loaded: Vec<PluginRecord>,
    pub failed: Vec<PluginLoadError>,
}

impl PluginLoadReport {
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}

/// Registry of plugin implementations.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    excluded: BTreeSet<String>,
    reserved_paths: BTreeSet<String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> &mut Self {
        self.plugins.push(plugin);
        self
    }

    /// Never invoke the plugin called `name`.
    pub fn exclude(&mut self, name: impl Into<String>) -> &mut Self {
        self.excluded.insert(name.into());
        self
    }

    /// Keep `path` away from plugins (e.g. routes the server itself owns).
    pub fn reserve_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.reserved_paths.insert(path.into());
        self
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins in load order: by name, ties in registration order.
    pub fn ordered(&self) -> Vec<Arc<dyn Plugin>> {
        let mut ordered = self.plugins.clone();
        ordered.sort_by(|a, b| a.name().cmp(b.name()));
        ordered
    }

    /// Invoke every plugin sequentially with the shared configuration.
    pub async fn load_all(&self, config: &Arc<PluginConfig>) -> PluginLoadReport {
        let mut router = Router::new();
        let mut claimed = self.reserved_paths.clone();
        let mut loaded = Vec::new();
        let mut failed = Vec::new();

        for plugin in self.ordered() {
            let name = plugin.name().to_string();
            if self.excluded.contains(&name) {
                tracing::info!(plugin = %name, "Plugin disabled; skipping");
                continue;
            }

            let mut routes = PluginRoutes::new(&name, claimed.clone());
            let outcome = AssertUnwindSafe(plugin.register(&mut routes, config))
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(())) => {
                    let candidate = router.clone();
                    let plugin_router = routes.router;
                    match std::panic::catch_unwind(AssertUnwindSafe(move || {
                        candidate.merge(plugin_router)
                    })) {
                        Ok(merged) => {
                            router = merged;
                            claimed.extend(routes.added.iter().cloned());
                            tracing::info!(
                                plugin = %name,
                                source = plugin.source(),
                                routes = ?routes.added,
                                "Loaded plugin"
                            );
                            loaded.push(PluginRecord {
                                name,
                                source: plugin.source().to_string(),
                                paths: routes.added,
                            });
                            continue;
                        }
                        Err(payload) => PluginLoadError::RouteConflict {
                            name,
                            message: panic_message(payload.as_ref()),
                        },
                    }
                }
                Ok(Err(e)) => PluginLoadError::Failed {
                    name,
                    message: format!("{e:#}"),
                },
                Err(payload) => PluginLoadError::Panicked {
                    name,
                    message: panic_message(payload.as_ref()),
                },
            };

            tracing::error!(plugin = %error.plugin_name(), error = %error, "Failed to load plugin");
            failed.push(error);
        }

        tracing::info!(
            loaded = loaded.len(),
            failed = failed.len(),
            "Plugin loading complete"
        );

        PluginLoadReport {
            router,
            loaded,
            failed,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::{body::Body, http::Request, routing::get};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    struct StaticPlugin {
        name: &'static str,
        path: &'static str,
        body: &'static str,
        log: Option<Arc<Mutex<Vec<String>>>>,
    }

    #[async_trait]
    impl Plugin for StaticPlugin {
        fn name(&self) -> &str {
            self.name
        }

        async fn register(
            &self,
            routes: &mut PluginRoutes,
            _config: &Arc<PluginConfig>,
        ) -> eyre::Result<()> {
            if let Some(log) = &self.log {
                log.lock().unwrap().push(self.name.to_string());
            }
            tokio::task::yield_now().await;
            let body = self.body;
            routes.route(self.path, get(move || async move { body }));
            Ok(())
        }
    }

    struct FailingPlugin {
        panic: bool,
    }

    #[async_trait]
    impl Plugin for FailingPlugin {
        fn name(&self) -> &str {
            "a-failing"
        }

        async fn register(
            &self,
            routes: &mut PluginRoutes,
            _config: &Arc<PluginConfig>,
        ) -> eyre::Result<()> {
            routes.route("/partial", get(|| async { "partial" }));
            if self.panic {
                panic!("boom");
            }
            Err(eyre::eyre!("registration exploded"))
        }
    }

    fn config() -> Arc<PluginConfig> {
        Arc::new(
            PluginConfig::builder()
                .static_dir("/tmp/static")
                .port(3000)
                .build()
                .unwrap(),
        )
    }

    fn plugin(name: &'static str, path: &'static str, body: &'static str) -> Arc<dyn Plugin> {
        Arc::new(StaticPlugin {
            name,
            path,
            body,
            log: None,
        })
    }

    async fn get_body(router: Router, uri: &str) -> (u16, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status().as_u16();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn test_plugins_load_in_lexicographic_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(Arc::new(StaticPlugin {
                name,
                path: "/shared",
                body: name,
                log: Some(log.clone()),
            }));
        }

        let report = registry.load_all(&config()).await;
        assert_eq!(*log.lock().unwrap(), vec!["alpha", "mid", "zeta"]);
        assert_eq!(report.loaded_count(), 3);

        // The earliest plugin owns the shared path.
        assert_eq!(report.loaded[0].paths, vec!["/shared".to_string()]);
        assert!(report.loaded[1].paths.is_empty());
        let (status, body) = get_body(report.router, "/shared").await;
        assert_eq!(status, 200);
        assert_eq!(body, "alpha");
    }

    #[tokio::test]
    async fn test_failing_plugin_does_not_stop_later_plugins() {
        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(FailingPlugin { panic: false }))
            .register(plugin("b-good", "/b", "b"));

        let report = registry.load_all(&config()).await;
        assert_eq!(report.loaded_count(), 1);
        assert_eq!(report.loaded[0].name, "b-good");
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0], PluginLoadError::Failed { .. }));

        let (status, _) = get_body(report.router.clone(), "/b").await;
        assert_eq!(status, 200);
        // Partial registrations of the failed plugin are discarded.
        let (status, _) = get_body(report.router, "/partial").await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_panicking_plugin_is_isolated() {
        let mut registry = PluginRegistry::new();
        registry
            .register(plugin("c-good", "/c", "c"))
            .register(Arc::new(FailingPlugin { panic: true }));

        let report = registry.load_all(&config()).await;
        assert_eq!(report.loaded_count(), 1);
        match &report.failed[0] {
            PluginLoadError::Panicked { name, message } => {
                assert_eq!(name, "a-failing");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_excluded_and_reserved() {
        let mut registry = PluginRegistry::new();
        registry
            .register(plugin("health-thief", "/health", "nope"))
            .register(plugin("skipped", "/skipped", "s"))
            .exclude("skipped")
            .reserve_path("/health");

        let report = registry.load_all(&config()).await;
        assert_eq!(report.loaded_count(), 1);
        assert!(report.loaded[0].paths.is_empty());

        let (status, _) = get_body(report.router.clone(), "/health").await;
        assert_eq!(status, 404);
        let (status, _) = get_body(report.router, "/skipped").await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_conflicting_route_patterns_fail_only_that_plugin() {
        let mut registry = PluginRegistry::new();
        registry
            .register(plugin("one", "/items/{id}", "one"))
            .register(plugin("two", "/items/{name}", "two"))
            .register(plugin("three", "/three", "three"));

        let report = registry.load_all(&config()).await;
        let loaded: Vec<_> = report.loaded.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(loaded, vec!["one", "three"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].plugin_name(), "two");
    }

    #[test]
    fn test_route_requires_leading_slash() {
        let mut routes = PluginRoutes::new("p", BTreeSet::new());
        routes.route("no-slash", get(|| async { "x" }));
        assert!(routes.paths().is_empty());
        assert_eq!(routes.skipped(), ["no-slash".to_string()]);
    }
}
