use std::sync::Arc;

use async_trait::async_trait;
use axum::{Json, routing::get};

use crate::{
    config::models::PluginConfig,
    core::plugin::{Plugin, PluginRoutes},
};

/// `GET /api/hello`
pub struct HelloPlugin;

#[async_trait]
impl Plugin for HelloPlugin {
    fn name(&self) -> &str {
        "hello"
    }

    async fn register(
        &self,
        routes: &mut PluginRoutes,
        _config: &Arc<PluginConfig>,
    ) -> eyre::Result<()> {
        routes.route(
            "/api/hello",
            get(|| async {
                Json(serde_json::json!({
                    "message": "Hello from the hello plugin",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                }))
            }),
        );
        Ok(())
    }
}
