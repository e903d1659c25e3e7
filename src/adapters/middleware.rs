//! Request middleware applied to the whole router.
//!
//! * `global_rate_limit_middleware` charges every request to the global budget
//! * `request_id_middleware` tags the request span and response with a UUID
//! * `request_timing_middleware` logs start and completion with latency
use std::{sync::Arc, time::Instant};

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use crate::{core::rate_limiter::ClientRateLimiter, utils::client_ip::ClientIdentity};

/// State of the global limiter layer.
#[derive(Clone)]
pub struct GlobalRateLimit {
    /// `None` when the global budget is disabled.
    pub limiter: Option<Arc<ClientRateLimiter>>,
    pub trust_proxy: bool,
}

/// Resolve the client identity, stash it for later layers and enforce the global budget.
pub async fn global_rate_limit_middleware(
    State(state): State<GlobalRateLimit>,
    mut req: Request,
    next: Next,
) -> Response {
    let client = ClientIdentity::from_request(&req, state.trust_proxy);

    if let Some(limiter) = &state.limiter {
        let decision = limiter.check(client.as_str()).await;
        if !decision.allowed {
            let path = req.uri().path();
            tracing::warn!(
                client = %client.as_str(),
                path,
                tier = limiter.tier().as_str(),
                "Rate limit exceeded"
            );
            return limiter.rejection(&decision, path);
        }
    }

    req.extensions_mut().insert(client);
    next.run(req).await
}

/// Log start/end of a request including latency.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    tracing::debug!(method = %method, uri = %uri, version = ?version, "Started processing request");

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        version = ?version,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Completed request"
    );

    response
}

/// Generate a per‑request UUID and expose it via tracing plus `X-Request-ID`.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("request", request_id = %request_id);

    let mut response = next.run(req).instrument(span).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", header_value);
    }

    response
}
