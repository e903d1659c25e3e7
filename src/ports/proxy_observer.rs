use std::time::Instant;

use axum::body::Body as AxumBody;
use hyper::{
    Method, Response, Uri,
    http::{request, response},
};

use crate::ports::http_client::HttpClientError;

/// What an observer knows about the exchange being proxied.
#[derive(Debug, Clone)]
pub struct ProxyContext {
    /// Path prefix of the matching rule.
    pub rule_path: String,
    pub method: Method,
    /// Path of the inbound request, before any prefix stripping.
    pub path: String,
    pub upstream_uri: Uri,
    pub client: String,
    pub started: Instant,
}

/// Hooks invoked around every proxied request.
///
/// Observers run in registration order and every observer sees every event. Request
/// and response hooks may rewrite headers. The first observer returning `Some` from
/// [`ProxyObserver::on_error`] supplies the error response; later observers are
/// still notified.
pub trait ProxyObserver: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn on_request(&self, _ctx: &ProxyContext, _request: &mut request::Parts) {}

    fn on_response(&self, _ctx: &ProxyContext, _response: &mut response::Parts) {}

    fn on_error(&self, _ctx: &ProxyContext, _error: &HttpClientError) -> Option<Response<AxumBody>> {
        None
    }
}
