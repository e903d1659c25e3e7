use thiserror::Error;
use url::Url;

use crate::config::{
    loader::find_placeholder,
    models::{ProxyOptions, ProxyRule, ProxyRuleEntry, RateLimitSettings, RawProxyRule},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, RuleValidationError>;

/// Per-rule validation errors. A failing rule is skipped; the others still apply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleValidationError {
    #[error("Proxy rule #{index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("Proxy rule #{index} ({path}) target still contains unresolved variable '${{{variable}}}'")]
    UnresolvedPlaceholder {
        index: usize,
        path: String,
        variable: String,
    },

    #[error("Proxy rule #{index} ({path}) has invalid target '{target}': {reason}")]
    InvalidTarget {
        index: usize,
        path: String,
        target: String,
        reason: String,
    },

    #[error("Proxy rule #{index} has invalid path '{path}': must start with '/'")]
    InvalidPath { index: usize, path: String },

    #[error("Proxy rule #{index} has malformed {field}: {reason}")]
    InvalidOptions {
        index: usize,
        field: &'static str,
        reason: String,
    },
}

/// Turn a raw document entry into a [`ProxyRule`].
pub fn validate_rule(entry: &ProxyRuleEntry) -> ValidationResult<ProxyRule> {
    let index = entry.index;
    let raw: RawProxyRule = serde_json::from_value(entry.raw.clone()).map_err(|e| {
        RuleValidationError::InvalidOptions {
            index,
            field: "rule",
            reason: e.to_string(),
        }
    })?;

    let path = raw
        .path
        .filter(|p| !p.trim().is_empty())
        .ok_or(RuleValidationError::MissingField {
            index,
            field: "path",
        })?;
    let target = raw
        .target
        .filter(|t| !t.trim().is_empty())
        .ok_or(RuleValidationError::MissingField {
            index,
            field: "target",
        })?;

    if let Some(variable) = find_placeholder(&target) {
        return Err(RuleValidationError::UnresolvedPlaceholder {
            index,
            path,
            variable: variable.to_string(),
        });
    }

    if !path.starts_with('/') {
        return Err(RuleValidationError::InvalidPath { index, path });
    }

    let target_url = validate_target(&target).map_err(|reason| RuleValidationError::InvalidTarget {
        index,
        path: path.clone(),
        target: target.clone(),
        reason,
    })?;

    let options: ProxyOptions = match raw.options {
        Some(value) => {
            serde_json::from_value(value).map_err(|e| RuleValidationError::InvalidOptions {
                index,
                field: "options",
                reason: e.to_string(),
            })?
        }
        None => ProxyOptions::default(),
    };

    let top_level_rate_limit: Option<RateLimitSettings> = raw
        .rate_limit
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| RuleValidationError::InvalidOptions {
            index,
            field: "rateLimit",
            reason: e.to_string(),
        })?;

    let rate_limit = options
        .rate_limit
        .clone()
        .or(top_level_rate_limit)
        .unwrap_or_else(RateLimitSettings::rule_default);

    Ok(ProxyRule {
        path,
        target: target_url,
        options,
        rate_limit,
    })
}

/// Validate every entry, logging and dropping the ones that fail. Order is preserved.
pub fn validate_rules(entries: &[ProxyRuleEntry]) -> Vec<ProxyRule> {
    entries
        .iter()
        .filter_map(|entry| match validate_rule(entry) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!(rule = entry.index, error = %e, "Skipping proxy rule");
                None
            }
        })
        .collect()
}

fn validate_target(target: &str) -> Result<Url, String> {
    let url = Url::parse(target).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(url)
}
