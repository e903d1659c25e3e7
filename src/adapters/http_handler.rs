use std::sync::Arc;

use axum::{Json, body::Body as AxumBody, response::IntoResponse};
use hyper::{Request, Response, StatusCode};

use crate::{
    adapters::{
        FileSystemAdapter,
        file_system::not_found_response,
        proxy::ProxyHandler,
    },
    core::GatewayService,
    ports::file_system::FileSystem,
};

/// Handles everything plugin routes did not claim: proxy rules, then static files,
/// then the single-page-application entry document.
pub struct HttpHandler {
    gateway_service: Arc<GatewayService>,
    proxy: Arc<ProxyHandler>,
    file_system: Arc<FileSystemAdapter>,
}

impl HttpHandler {
    pub fn new(
        gateway_service: Arc<GatewayService>,
        proxy: Arc<ProxyHandler>,
        file_system: Arc<FileSystemAdapter>,
    ) -> Self {
        Self {
            gateway_service,
            proxy,
            file_system,
        }
    }

    pub fn gateway(&self) -> &Arc<GatewayService> {
        &self.gateway_service
    }

    /// Fallback dispatcher.
    pub async fn handle_request(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let path = req.uri().path().to_string();

        if let Some(route) = self.gateway_service.find_matching_route(&path) {
            return self.proxy.handle(route, req).await;
        }

        let (parts, _body) = req.into_parts();

        match self.file_system.serve_static(&parts).await {
            Ok(Some(response)) => return response,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to serve static file");
            }
        }

        match self.file_system.serve_index(&parts).await {
            Ok(Some(response)) => {
                tracing::debug!(path = %path, "Serving SPA entry document");
                response
            }
            Ok(None) => not_found_response(&path),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to serve SPA entry document");
                not_found_response(&path)
            }
        }
    }

    /// `GET /health`
    pub async fn handle_health_check() -> Response<AxumBody> {
        let body = serde_json::json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        (StatusCode::OK, Json(body)).into_response()
    }
}

impl Clone for HttpHandler {
    fn clone(&self) -> Self {
        Self {
            gateway_service: self.gateway_service.clone(),
            proxy: self.proxy.clone(),
            file_system: self.file_system.clone(),
        }
    }
}
