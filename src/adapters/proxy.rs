//! Reverse-proxy forwarding for matched proxy rules.
//!
//! [`ProxyHandler`] applies the rule limiter, rewrites the request for the upstream,
//! sends it through the [`HttpClient`] port and turns transport failures into a `502`
//! JSON body. Every step is reported to an ordered list of [`ProxyObserver`]s; the
//! built-in [`LoggingObserver`] always runs first.
use std::{sync::Arc, time::Instant};

use axum::{Json, body::Body as AxumBody, response::IntoResponse};
use hyper::{
    HeaderMap, Request, Response, StatusCode, Uri,
    header::{self, HeaderName, HeaderValue},
};
use url::Position;

use crate::{
    config::models::ProxyRule,
    core::gateway::ProxyRoute,
    ports::{
        http_client::{HttpClient, HttpClientError},
        proxy_observer::{ProxyContext, ProxyObserver},
    },
    utils::client_ip::ClientIdentity,
};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Structured logging for every proxy event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl ProxyObserver for LoggingObserver {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_request(&self, ctx: &ProxyContext, _request: &mut hyper::http::request::Parts) {
        tracing::info!(
            method = %ctx.method,
            path = %ctx.path,
            rule = %ctx.rule_path,
            target = %ctx.upstream_uri,
            client = %ctx.client,
            "Proxying request"
        );
    }

    fn on_response(&self, ctx: &ProxyContext, response: &mut hyper::http::response::Parts) {
        tracing::info!(
            method = %ctx.method,
            path = %ctx.path,
            target = %ctx.upstream_uri,
            status = response.status.as_u16(),
            elapsed_ms = ctx.started.elapsed().as_millis() as u64,
            "Proxy response received"
        );
    }

    fn on_error(&self, ctx: &ProxyContext, error: &HttpClientError) -> Option<Response<AxumBody>> {
        tracing::error!(
            method = %ctx.method,
            path = %ctx.path,
            target = %ctx.upstream_uri,
            code = error.code(),
            error = %error,
            "Proxy error"
        );
        None
    }
}

/// Forwards requests that matched a proxy rule.
pub struct ProxyHandler {
    client: Arc<dyn HttpClient>,
    observers: Vec<Arc<dyn ProxyObserver>>,
    trust_proxy: bool,
}

impl ProxyHandler {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            client,
            observers: vec![Arc::new(LoggingObserver)],
            trust_proxy: false,
        }
    }

    /// Append an observer; it runs after the ones already registered.
    pub fn with_observer(mut self, observer: Arc<dyn ProxyObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Identify clients by the first `X-Forwarded-For` hop.
    pub fn trust_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }

    pub fn observer_names(&self) -> Vec<&str> {
        self.observers.iter().map(|o| o.name()).collect()
    }

    /// Apply the rule limiter, then forward.
    pub async fn handle(&self, route: &ProxyRoute, req: Request<AxumBody>) -> Response<AxumBody> {
        let client = ClientIdentity::from_request(&req, self.trust_proxy);

        if let Some(limiter) = &route.limiter {
            let decision = limiter.check(client.as_str()).await;
            if !decision.allowed {
                let path = req.uri().path();
                tracing::warn!(
                    client = %client.as_str(),
                    path,
                    rule = %route.rule.path,
                    tier = limiter.tier().as_str(),
                    "Rate limit exceeded"
                );
                return limiter.rejection(&decision, path);
            }
        }

        self.forward(&route.rule, req, &client).await
    }

    /// Send `req` to the rule's target and relay the answer.
    pub async fn forward(
        &self,
        rule: &ProxyRule,
        req: Request<AxumBody>,
        client: &ClientIdentity,
    ) -> Response<AxumBody> {
        let (mut parts, body) = req.into_parts();
        let path = parts.uri.path().to_string();

        let mut ctx = ProxyContext {
            rule_path: rule.path.clone(),
            method: parts.method.clone(),
            path: path.clone(),
            upstream_uri: parts.uri.clone(),
            client: client.as_str().to_string(),
            started: Instant::now(),
        };

        let upstream_uri = match upstream_uri(rule, &parts.uri) {
            Ok(uri) => uri,
            Err(e) => return self.handle_error(&ctx, &e),
        };
        ctx.upstream_uri = upstream_uri.clone();

        let inbound_host = parts.headers.get(header::HOST).cloned();
        let cookies: Vec<HeaderValue> = parts.headers.get_all(header::COOKIE).iter().cloned().collect();
        let authorization = parts.headers.get(header::AUTHORIZATION).cloned();

        strip_hop_by_hop(&mut parts.headers);

        if rule.options.change_origin {
            match HeaderValue::from_str(target_authority(rule)) {
                Ok(host) => {
                    parts.headers.insert(header::HOST, host);
                }
                Err(_) => {
                    parts.headers.remove(header::HOST);
                }
            }
        }

        if rule.options.xfwd {
            add_forwarded_headers(&mut parts.headers, client, inbound_host.as_ref());
        }

        for (name, value) in &rule.options.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    parts.headers.insert(name, value);
                }
                _ => tracing::warn!(rule = %rule.path, header = %name, "Ignoring invalid proxy header"),
            }
        }

        // Credentials always reach the upstream unless an observer rewrites them.
        if !cookies.is_empty() {
            parts.headers.remove(header::COOKIE);
            for cookie in cookies {
                parts.headers.append(header::COOKIE, cookie);
            }
        }
        if let Some(authorization) = authorization {
            parts.headers.insert(header::AUTHORIZATION, authorization);
        }

        parts.uri = upstream_uri;

        for observer in &self.observers {
            observer.on_request(&ctx, &mut parts);
        }

        let request = Request::from_parts(parts, body);
        let result = match rule.options.timeout() {
            Some(limit) => tokio::time::timeout(limit, self.client.send_request(request))
                .await
                .unwrap_or_else(|_| Err(HttpClientError::Timeout(limit.as_millis() as u64))),
            None => self.client.send_request(request).await,
        };

        match result {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                for observer in &self.observers {
                    observer.on_response(&ctx, &mut parts);
                }
                Response::from_parts(parts, body)
            }
            Err(e) => self.handle_error(&ctx, &e),
        }
    }

    /// Notify every observer; the first response offered wins, else a `502`.
    fn handle_error(&self, ctx: &ProxyContext, error: &HttpClientError) -> Response<AxumBody> {
        let mut intercepted = None;
        for observer in &self.observers {
            let response = observer.on_error(ctx, error);
            if intercepted.is_none() {
                intercepted = response;
            }
        }
        intercepted.unwrap_or_else(|| proxy_error_response(ctx, error))
    }
}

/// `502` body sent when the upstream could not be reached.
pub fn proxy_error_response(ctx: &ProxyContext, error: &HttpClientError) -> Response<AxumBody> {
    let body = serde_json::json!({
        "error": "Proxy Error",
        "message": "Failed to reach the upstream service",
        "details": error.to_string(),
        "code": error.code(),
        "path": ctx.path,
    });
    (StatusCode::BAD_GATEWAY, Json(body)).into_response()
}

/// `target` base path + forwarded request path + query.
fn upstream_uri(rule: &ProxyRule, inbound: &Uri) -> Result<Uri, HttpClientError> {
    let origin = &rule.target[..Position::BeforePath];
    let base = rule.target.path().trim_end_matches('/');
    let forwarded = rule.forwarded_path(inbound.path());

    let mut uri = format!("{origin}{base}{forwarded}");
    if let Some(query) = inbound.query() {
        uri.push('?');
        uri.push_str(query);
    }

    uri.parse::<Uri>()
        .map_err(|e| HttpClientError::InvalidRequest(format!("Invalid upstream URI '{uri}': {e}")))
}

/// `host[:port]` of the rule target.
fn target_authority(rule: &ProxyRule) -> &str {
    &rule.target[Position::BeforeHost..Position::AfterPort]
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn add_forwarded_headers(
    headers: &mut HeaderMap,
    client: &ClientIdentity,
    inbound_host: Option<&HeaderValue>,
) {
    let forwarded_for = match headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        Some(existing) => format!("{existing}, {}", client.as_str()),
        None => client.as_str().to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert("x-forwarded-for", value);
    }
    if !headers.contains_key("x-forwarded-proto") {
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    }
    if let Some(host) = inbound_host
        && !headers.contains_key("x-forwarded-host")
    {
        headers.insert("x-forwarded-host", host.clone());
    }
}
