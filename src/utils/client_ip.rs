use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use hyper::HeaderMap;

/// Key used for rate-limit budgets and `X-Forwarded-For`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl ClientIdentity {
    pub const UNKNOWN: &'static str = "unknown";

    /// Resolve the identity of `req`'s client.
    ///
    /// With `trust_proxy` the first `X-Forwarded-For` hop wins; otherwise (or when the
    /// header is absent) the socket peer address from `ConnectInfo` is used.
    pub fn from_request(req: &Request, trust_proxy: bool) -> Self {
        if let Some(identity) = req.extensions().get::<ClientIdentity>() {
            return identity.clone();
        }
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Self::resolve(req.headers(), peer, trust_proxy)
    }

    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Self {
        if trust_proxy && let Some(hop) = first_forwarded_hop(headers) {
            return Self(hop);
        }
        match peer {
            Some(addr) => Self(addr.ip().to_string()),
            None => Self(Self::UNKNOWN.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn first_forwarded_hop(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
}
