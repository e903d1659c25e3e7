//! Assembles the axum `Router`.
//!
//! Precedence, first match wins:
//! 1. global rate limit (layer over everything)
//! 2. `GET /health`
//! 3. plugin routes
//! 4. fallback: proxy rules, static files, SPA entry document, JSON 404
use std::sync::Arc;

use axum::{Router, extract::Request, middleware, routing::get};
use tower_http::compression::CompressionLayer;

use crate::adapters::{
    http_handler::HttpHandler,
    middleware::{
        GlobalRateLimit, global_rate_limit_middleware, request_id_middleware,
        request_timing_middleware,
    },
};

pub const HEALTH_PATH: &str = "/health";

pub fn build_router(handler: HttpHandler, plugin_routes: Router, global: GlobalRateLimit) -> Router {
    let handler = Arc::new(handler);

    Router::new()
        .route(HEALTH_PATH, get(HttpHandler::handle_health_check))
        .merge(plugin_routes)
        .fallback(move |req: Request| {
            let handler = handler.clone();
            async move { handler.handle_request(req).await }
        })
        .layer(middleware::from_fn_with_state(
            global,
            global_rate_limit_middleware,
        ))
        .layer(middleware::from_fn(request_timing_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CompressionLayer::new())
}
