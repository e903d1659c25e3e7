//! Per-client rate limiting for the two limiter tiers.
//!
//! A [`ClientRateLimiter`] is built for the global tier (every request) and for each
//! proxy rule that keeps its limiter enabled. Both count per client identity and are
//! independent of each other: a request matching a rule is charged to the global
//! budget first and to the rule budget second.
//!
//! Two algorithms are available. `FixedWindow` (default) keeps a counter per client
//! in an `scc::HashMap`, reset at each window boundary; the entry lock makes the
//! check-then-increment atomic. `TokenBucket` uses `governor`'s keyed GCRA limiter
//! with a burst of `max` cells refilled over one window.
use std::{
    num::NonZeroU32,
    time::{Duration, Instant},
};

use axum::{
    Json,
    response::{IntoResponse, Response as AxumResponse},
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
};
use http::{HeaderValue, StatusCode, header};
use scc::HashMap;
use thiserror::Error;

use crate::config::models::{RateLimitAlgorithm, RateLimitSettings};

pub type KeyedRateLimiterImpl<K> = RateLimiter<K, DefaultKeyedStateStore<K>, DefaultClock>;

/// Which budget a limiter enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitTier {
    Global,
    Rule,
}

impl RateLimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitTier::Global => "global",
            RateLimitTier::Rule => "rule",
        }
    }

    /// Operator-facing message; differs per tier so the triggering budget is obvious.
    pub fn message(&self) -> &'static str {
        match self {
            RateLimitTier::Global => "Too many requests from this IP, please try again later.",
            RateLimitTier::Rule => {
                "Too many requests to this endpoint, please try again later."
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limit 'max' must be between 1 and {}", u32::MAX)]
    InvalidMax,
    #[error("Rate limit 'windowMs' must be greater than 0")]
    InvalidWindow,
}

/// Outcome of one [`ClientRateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Time until the client may retry (zero when allowed).
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    started: Instant,
    count: u64,
}

/// Fixed-window counter keyed by client identity.
pub struct FixedWindowLimiter {
    window: Duration,
    max: u64,
    counters: HashMap<String, WindowCounter>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, max: u64) -> Self {
        Self {
            window,
            max,
            counters: HashMap::new(),
        }
    }

    pub async fn check(&self, client: &str) -> RateLimitDecision {
        self.check_at(client, Instant::now()).await
    }

    /// Count one request for `client` at `now`.
    pub async fn check_at(&self, client: &str, now: Instant) -> RateLimitDecision {
        let mut entry = self
            .counters
            .entry_async(client.to_string())
            .await
            .or_insert_with(|| WindowCounter {
                started: now,
                count: 0,
            });
        let counter = entry.get_mut();

        if now.saturating_duration_since(counter.started) >= self.window {
            counter.started = now;
            counter.count = 0;
        }
        counter.count += 1;

        let allowed = counter.count <= self.max;
        let retry_after = if allowed {
            Duration::ZERO
        } else {
            self.window
                .saturating_sub(now.saturating_duration_since(counter.started))
        };

        RateLimitDecision {
            allowed,
            limit: self.max,
            remaining: self.max.saturating_sub(counter.count),
            retry_after,
        }
    }

    /// Drop counters whose window has elapsed at `now`. Returns the number removed.
    pub async fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.counters.len();
        self.counters
            .retain_async(|_, counter| now.saturating_duration_since(counter.started) < self.window)
            .await;
        before.saturating_sub(self.counters.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.counters.len()
    }
}

enum LimiterBackend {
    FixedWindow(FixedWindowLimiter),
    TokenBucket(KeyedRateLimiterImpl<String>),
}

/// A rate limiter for one tier, keyed by client identity.
pub struct ClientRateLimiter {
    tier: RateLimitTier,
    settings: RateLimitSettings,
    backend: LimiterBackend,
}

impl ClientRateLimiter {
    /// Build a limiter from its settings.
    pub fn new(settings: &RateLimitSettings, tier: RateLimitTier) -> Result<Self, RateLimitError> {
        if settings.window_ms == 0 {
            return Err(RateLimitError::InvalidWindow);
        }
        let burst = u32::try_from(settings.max)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(RateLimitError::InvalidMax)?;

        let backend = match settings.algorithm {
            RateLimitAlgorithm::FixedWindow => {
                LimiterBackend::FixedWindow(FixedWindowLimiter::new(settings.window(), settings.max))
            }
            RateLimitAlgorithm::TokenBucket => {
                let quota = Quota::with_period(settings.window() / burst.get())
                    .ok_or(RateLimitError::InvalidWindow)?
                    .allow_burst(burst);
                LimiterBackend::TokenBucket(RateLimiter::keyed(quota))
            }
        };

        tracing::info!(
            tier = tier.as_str(),
            algorithm = ?settings.algorithm,
            window_ms = settings.window_ms,
            max = settings.max,
            "Created rate limiter"
        );

        Ok(Self {
            tier,
            settings: settings.clone(),
            backend,
        })
    }

    pub fn tier(&self) -> RateLimitTier {
        self.tier
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Count one request for `client` and decide whether it may proceed.
    pub async fn check(&self, client: &str) -> RateLimitDecision {
        match &self.backend {
            LimiterBackend::FixedWindow(limiter) => limiter.check(client).await,
            LimiterBackend::TokenBucket(limiter) => match limiter.check_key(&client.to_string()) {
                Ok(()) => RateLimitDecision {
                    allowed: true,
                    limit: self.settings.max,
                    remaining: 0,
                    retry_after: Duration::ZERO,
                },
                Err(not_until) => RateLimitDecision {
                    allowed: false,
                    limit: self.settings.max,
                    remaining: 0,
                    retry_after: not_until.wait_time_from(DefaultClock::default().now()),
                },
            },
        }
    }

    /// Forget clients whose budget has fully recovered.
    pub async fn purge_expired(&self) -> usize {
        match &self.backend {
            LimiterBackend::FixedWindow(limiter) => limiter.purge_expired_at(Instant::now()).await,
            LimiterBackend::TokenBucket(limiter) => {
                let before = limiter.len();
                limiter.retain_recent();
                limiter.shrink_to_fit();
                before.saturating_sub(limiter.len())
            }
        }
    }

    /// The `429` sent when `decision` denied a request for `path`.
    pub fn rejection(&self, decision: &RateLimitDecision, path: &str) -> AxumResponse {
        let body = serde_json::json!({
            "error": "Too Many Requests",
            "message": self.tier.message(),
            "tier": self.tier.as_str(),
            "path": path,
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();

        // Round up so clients never retry early.
        let retry_secs = decision.retry_after.as_millis().div_ceil(1000).max(1);
        if let Ok(value) = HeaderValue::from_str(&retry_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
            response.headers_mut().insert("ratelimit-limit", value);
        }
        response
    }
}
