//! Configuration data structures for Portico.
//!
//! Proxy rules arrive as JSON (camelCase keys, see `proxy.config.json`) and are
//! resolved into [`ProxyRule`] values one at a time so that a single malformed rule
//! never takes the rest of the document down with it. [`PluginConfig`] is the
//! immutable value handed to every plugin at startup.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use url::Url;

fn default_true() -> bool {
    true
}

/// Algorithm used to enforce a rate-limit budget.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum RateLimitAlgorithm {
    /// Counter per client, reset at every window boundary.
    #[default]
    FixedWindow,
    /// GCRA token bucket: burst of `max`, refilled at `max` per window.
    TokenBucket,
}

/// Rate-limit budget for one tier (global or a single proxy rule).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    pub window_ms: u64,
    pub max: u64,
    pub enabled: bool,
    pub algorithm: RateLimitAlgorithm,
}

impl RateLimitSettings {
    pub const GLOBAL_WINDOW_MS: u64 = 15 * 60 * 1000;
    pub const GLOBAL_MAX: u64 = 1000;
    pub const RULE_WINDOW_MS: u64 = 60 * 1000;
    pub const RULE_MAX: u64 = 100;

    /// Defaults for the limiter applied to every request.
    pub fn global_default() -> Self {
        Self {
            window_ms: Self::GLOBAL_WINDOW_MS,
            max: Self::GLOBAL_MAX,
            enabled: true,
            algorithm: RateLimitAlgorithm::FixedWindow,
        }
    }

    /// Defaults for a proxy rule that does not say otherwise.
    pub fn rule_default() -> Self {
        Self {
            window_ms: Self::RULE_WINDOW_MS,
            max: Self::RULE_MAX,
            enabled: true,
            algorithm: RateLimitAlgorithm::FixedWindow,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self::rule_default()
    }
}

/// Forwarding options of a proxy rule.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyOptions {
    /// Rewrite the `Host` header to the target's authority.
    pub change_origin: bool,
    /// Remove the rule path from the forwarded request path.
    pub strip_prefix: bool,
    /// Add `X-Forwarded-For`, `X-Forwarded-Proto` and `X-Forwarded-Host`.
    #[serde(default = "default_true")]
    pub xfwd: bool,
    /// Extra headers set on every upstream request.
    pub headers: HashMap<String, String>,
    /// Upstream timeout; expiry is reported as a transport error.
    pub timeout_ms: Option<u64>,
    pub rate_limit: Option<RateLimitSettings>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            change_origin: true,
            strip_prefix: false,
            xfwd: true,
            headers: HashMap::new(),
            timeout_ms: None,
            rate_limit: None,
        }
    }
}

impl ProxyOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// One element of the proxy document before validation.
///
/// The raw JSON is kept so that field errors surface per rule instead of failing
/// deserialization of the whole document.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRuleEntry {
    /// Position in the document, used in diagnostics.
    pub index: usize,
    pub raw: serde_json::Value,
}

/// Loose shape of a rule, all fields optional.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawProxyRule {
    pub path: Option<String>,
    pub target: Option<String>,
    pub options: Option<serde_json::Value>,
    pub rate_limit: Option<serde_json::Value>,
}

/// A validated proxy rule: path prefix forwarded to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRule {
    pub path: String,
    pub target: Url,
    pub options: ProxyOptions,
    /// Effective rule-scoped budget (`options.rateLimit`, then top-level `rateLimit`,
    /// then the rule defaults).
    pub rate_limit: RateLimitSettings,
}

impl ProxyRule {
    /// Prefix match on path-segment boundaries: `/api` matches `/api` and `/api/x`
    /// but not `/apix`. A rule path ending in `/` matches anything under it.
    pub fn matches(&self, request_path: &str) -> bool {
        path_has_prefix(request_path, &self.path)
    }

    /// Path forwarded upstream for `request_path`, honouring `stripPrefix`.
    pub fn forwarded_path<'a>(&self, request_path: &'a str) -> &'a str {
        if !self.options.strip_prefix {
            return request_path;
        }
        let prefix = self.path.trim_end_matches('/');
        match request_path.strip_prefix(prefix) {
            Some("") | None => "/",
            Some(rest) => rest,
        }
    }
}

pub(crate) fn path_has_prefix(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() || prefix == "/" {
        return true;
    }
    if prefix.ends_with('/') {
        return path.starts_with(prefix) || path == prefix.trim_end_matches('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Immutable configuration shared by every plugin.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    /// Absolute path of the static asset directory.
    pub static_path: PathBuf,
    /// The static directory exactly as it was given on the command line / env.
    pub static_dir: String,
    pub port: u16,
    pub proxy_config_path: Option<PathBuf>,
    /// Free-form values from the `plugin_config` settings table.
    #[serde(default)]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

impl PluginConfig {
    pub const PROXY_CONFIG_FILE: &'static str = "proxy.config.json";

    pub fn builder() -> PluginConfigBuilder {
        PluginConfigBuilder::default()
    }

    /// The explicit override, or `<static_path>/proxy.config.json`.
    pub fn resolved_proxy_config_path(&self) -> PathBuf {
        self.proxy_config_path
            .clone()
            .unwrap_or_else(|| self.static_path.join(Self::PROXY_CONFIG_FILE))
    }

    pub fn extension(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }
}

/// Builder for [`PluginConfig`]; resolves the static directory to an absolute path.
#[derive(Default)]
pub struct PluginConfigBuilder {
    static_dir: Option<String>,
    port: Option<u16>,
    proxy_config_path: Option<PathBuf>,
    extensions: serde_json::Map<String, serde_json::Value>,
}

impl PluginConfigBuilder {
    pub fn static_dir(mut self, dir: impl Into<String>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn proxy_config_path(mut self, path: Option<impl Into<PathBuf>>) -> Self {
        self.proxy_config_path = path.map(Into::into);
        self
    }

    pub fn extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub fn extensions(mut self, extensions: serde_json::Map<String, serde_json::Value>) -> Self {
        self.extensions.extend(extensions);
        self
    }

    /// Build the config. Relative static directories are resolved against the current
    /// working directory.
    pub fn build(self) -> Result<PluginConfig, String> {
        let static_dir = self
            .static_dir
            .ok_or_else(|| "static_dir is required".to_string())?;
        let port = self.port.ok_or_else(|| "port is required".to_string())?;

        let raw = Path::new(&static_dir);
        let static_path = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| format!("Cannot resolve current directory: {e}"))?
                .join(raw)
        };

        Ok(PluginConfig {
            static_path,
            static_dir,
            port,
            proxy_config_path: self.proxy_config_path,
            extensions: self.extensions,
        })
    }
}
