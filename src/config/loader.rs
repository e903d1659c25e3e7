//! Proxy rule document loading.
//!
//! The document is read as text, `${VAR}` placeholders are replaced from the process
//! environment, and only then is the text parsed as JSON. Document-level failures
//! disable proxying for the session; rule-level problems are left to
//! [`crate::config::validation`].
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use thiserror::Error;

use crate::config::models::ProxyRuleEntry;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder pattern is valid"));

/// Document-level proxy configuration errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to read proxy config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse proxy config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid proxy config shape in {path}: {message}")]
    Shape { path: PathBuf, message: String },
}

/// Result of placeholder substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    /// Variable names that had no value, in order of first appearance.
    pub unresolved: Vec<String>,
}

/// Replace every `${NAME}` in `input` using `lookup`. Unknown names are left verbatim
/// and reported in [`Substitution::unresolved`].
pub fn substitute_env_vars<F>(input: &str, lookup: F) -> Substitution
where
    F: Fn(&str) -> Option<String>,
{
    let mut unresolved: Vec<String> = Vec::new();
    let text = PLACEHOLDER
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match lookup(name) {
                Some(value) => value,
                None => {
                    if !unresolved.iter().any(|n| n == name) {
                        unresolved.push(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    Substitution { text, unresolved }
}

/// First placeholder still present in `value`, if any.
pub fn find_placeholder(value: &str) -> Option<&str> {
    PLACEHOLDER
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parse substituted document text into rule entries.
///
/// Accepts `{"proxies": [...]}` or a bare top-level array of objects.
pub fn parse_proxy_document(path: &Path, text: &str) -> Result<Vec<ProxyRuleEntry>, ConfigError> {
    let document: serde_json::Value =
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let rules = match document {
        serde_json::Value::Array(rules) => rules,
        serde_json::Value::Object(mut map) => match map.remove("proxies") {
            Some(serde_json::Value::Array(rules)) => rules,
            Some(other) => {
                return Err(ConfigError::Shape {
                    path: path.to_path_buf(),
                    message: format!("'proxies' must be an array, found {}", json_kind(&other)),
                });
            }
            None => {
                return Err(ConfigError::Shape {
                    path: path.to_path_buf(),
                    message: "missing 'proxies' array".to_string(),
                });
            }
        },
        other => {
            return Err(ConfigError::Shape {
                path: path.to_path_buf(),
                message: format!("expected an object or array, found {}", json_kind(&other)),
            });
        }
    };

    if let Some(index) = rules.iter().position(|rule| !rule.is_object()) {
        return Err(ConfigError::Shape {
            path: path.to_path_buf(),
            message: format!("rule #{index} is not an object"),
        });
    }

    Ok(rules
        .into_iter()
        .enumerate()
        .map(|(index, raw)| ProxyRuleEntry { index, raw })
        .collect())
}

/// Load the proxy document at `source`.
///
/// `Ok(None)` means there is no proxy configuration (no path given, or no file).
pub async fn try_load_proxy_rules(
    source: Option<&Path>,
) -> Result<Option<Vec<ProxyRuleEntry>>, ConfigError> {
    try_load_proxy_rules_with(source, |name| std::env::var(name).ok()).await
}

/// [`try_load_proxy_rules`] resolving placeholders through `lookup`.
pub async fn try_load_proxy_rules_with<F>(
    source: Option<&Path>,
    lookup: F,
) -> Result<Option<Vec<ProxyRuleEntry>>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(path) = source else {
        return Ok(None);
    };

    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let substituted = substitute_env_vars(&text, lookup);
    for name in &substituted.unresolved {
        tracing::warn!(
            config = %path.display(),
            variable = %name,
            "Environment variable is not set; placeholder left unresolved"
        );
    }

    parse_proxy_document(path, &substituted.text).map(Some)
}

/// Load the proxy document, logging and swallowing document-level errors.
///
/// Returns `None` when there is nothing to apply; rules are never partially applied.
pub async fn load_proxy_rules(source: Option<&Path>) -> Option<Vec<ProxyRuleEntry>> {
    match try_load_proxy_rules(source).await {
        Ok(Some(entries)) => {
            tracing::info!(
                config = %source.map(|p| p.display().to_string()).unwrap_or_default(),
                rules = entries.len(),
                "Loaded proxy configuration"
            );
            Some(entries)
        }
        Ok(None) => {
            tracing::info!("No proxy configuration found; proxying disabled");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "Proxy configuration rejected; proxying disabled");
            None
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
