use std::sync::Arc;

use async_trait::async_trait;
use axum::{Json, routing::get};

use crate::{
    config::models::PluginConfig,
    core::plugin::{Plugin, PluginRoutes},
};

/// `GET /api/app-config`: the non-sensitive part of the server configuration,
/// for front-end bootstrapping.
pub struct AppConfigPlugin;

#[async_trait]
impl Plugin for AppConfigPlugin {
    fn name(&self) -> &str {
        "app-config"
    }

    async fn register(
        &self,
        routes: &mut PluginRoutes,
        config: &Arc<PluginConfig>,
    ) -> eyre::Result<()> {
        let public = serde_json::json!({
            "port": config.port,
            "staticDir": config.static_dir,
            "proxyConfigured": tokio::fs::try_exists(config.resolved_proxy_config_path())
                .await
                .unwrap_or(false),
            "extensions": config.extensions,
        });

        routes.route(
            "/api/app-config",
            get(move || {
                let public = public.clone();
                async move { Json(public) }
            }),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::plugins::builtin;

    #[tokio::test]
    async fn test_builtin_plugins_register_routes() {
        let config = Arc::new(
            PluginConfig::builder()
                .static_dir("/nonexistent/static")
                .port(4321)
                .extension("feature", serde_json::json!("on"))
                .build()
                .unwrap(),
        );
        let report = builtin().load_all(&config).await;
        assert_eq!(report.loaded_count(), 2);
        let names: Vec<_> = report.loaded.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["app-config", "hello"]);

        let router: Router = report.router;
        let response = router
            .clone()
            .oneshot(Request::builder().uri("/api/app-config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["port"], 4321);
        assert_eq!(json["proxyConfigured"], false);
        assert_eq!(json["extensions"]["feature"], "on");

        let response = router
            .oneshot(Request::builder().uri("/api/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }
}
