//! Proxy route table.
//!
//! The `GatewayService` holds the validated proxy rules in document order, each
//! paired with its rule-scoped rate limiter. It provides:
//! * First-match route lookup (document order, segment-aware prefixes)
//! * Access to each route's limiter
//! * Expiry sweeping across every rule limiter
//!
//! No I/O happens here; the table is built once at startup and never mutated.
use std::sync::Arc;

use crate::{
    config::{
        models::{ProxyRule, ProxyRuleEntry},
        validation::validate_rules,
    },
    core::rate_limiter::{ClientRateLimiter, RateLimitTier},
};

/// A proxy rule plus its runtime state.
pub struct ProxyRoute {
    pub rule: ProxyRule,
    /// `None` when the rule disables rate limiting.
    pub limiter: Option<Arc<ClientRateLimiter>>,
}

impl ProxyRoute {
    fn new(rule: ProxyRule) -> Self {
        if !rule.rate_limit.enabled {
            return Self {
                rule,
                limiter: None,
            };
        }

        let limiter = match ClientRateLimiter::new(&rule.rate_limit, RateLimitTier::Rule) {
            Ok(limiter) => Some(Arc::new(limiter)),
            Err(e) => {
                tracing::error!(path = %rule.path, error = %e, "Invalid rate limit; rule runs without a limiter");
                None
            }
        };
        Self { rule, limiter }
    }
}

/// Ordered proxy route table. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct GatewayService {
    routes: Vec<ProxyRoute>,
}

impl GatewayService {
    /// Build the table from already validated rules, preserving their order.
    pub fn new(rules: Vec<ProxyRule>) -> Self {
        let routes: Vec<ProxyRoute> = rules.into_iter().map(ProxyRoute::new).collect();
        for route in &routes {
            tracing::info!(
                path = %route.rule.path,
                target = %route.rule.target,
                rate_limited = route.limiter.is_some(),
                "Registered proxy rule"
            );
        }
        Self { routes }
    }

    /// Validate raw document entries and build the table from the ones that pass.
    pub fn from_entries(entries: &[ProxyRuleEntry]) -> Self {
        Self::new(validate_rules(entries))
    }

    /// The first rule, in document order, whose path prefixes `path`.
    pub fn find_matching_route(&self, path: &str) -> Option<&ProxyRoute> {
        self.routes.iter().find(|route| route.rule.matches(path))
    }

    pub fn routes(&self) -> &[ProxyRoute] {
        &self.routes
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Purge expired client entries from every rule limiter.
    pub async fn purge_expired(&self) -> usize {
        let mut purged = 0;
        for limiter in self.routes.iter().filter_map(|route| route.limiter.as_ref()) {
            purged += limiter.purge_expired().await;
        }
        purged
    }
}
