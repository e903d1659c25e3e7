//! Runtime settings for the server process.
//!
//! Layering, lowest precedence first:
//! 1. built-in defaults
//! 2. optional settings file (TOML / YAML / JSON, by extension)
//! 3. `PORTICO_*` environment variables (`__` separates nested keys, e.g.
//!    `PORTICO_GLOBAL_RATE_LIMIT__MAX=500`)
//! 4. the conventional `PORT` and `STATIC_DIR` variables
//! 5. command line overrides
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::models::{PluginConfig, RateLimitSettings};

/// Log output style.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PluginSettings {
    /// Plugin names that are never invoked.
    pub disabled: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub static_dir: String,
    /// Overrides `<static_dir>/proxy.config.json`.
    pub proxy_config: Option<String>,
    pub global_rate_limit: RateLimitSettings,
    /// Take the client identity from the first `X-Forwarded-For` hop.
    pub trust_proxy: bool,
    pub log: LogSettings,
    pub plugins: PluginSettings,
    /// Extension fields copied into [`PluginConfig::extensions`].
    pub plugin_config: serde_json::Map<String, serde_json::Value>,
    /// File these settings were read from, if any.
    #[serde(skip)]
    pub settings_file: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            static_dir: "public".to_string(),
            proxy_config: None,
            global_rate_limit: RateLimitSettings::global_default(),
            trust_proxy: false,
            log: LogSettings::default(),
            plugins: PluginSettings::default(),
            plugin_config: serde_json::Map::new(),
            settings_file: None,
        }
    }
}

/// Values supplied on the command line; `None` leaves the lower layers in charge.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub settings_file: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub static_dir: Option<String>,
    pub proxy_config: Option<String>,
    pub log_format: Option<LogFormat>,
}

impl ServerSettings {
    /// Load settings from the process environment plus `overrides`.
    pub fn load(overrides: &SettingsOverrides) -> Result<Self> {
        Self::load_from(overrides, std::env::vars().collect())
    }

    /// Load settings against an explicit environment map.
    pub fn load_from(overrides: &SettingsOverrides, env: HashMap<String, String>) -> Result<Self> {
        let defaults = Config::try_from(&ServerSettings::default())
            .wrap_err("Failed to serialize default settings")?;

        let mut builder = Config::builder().add_source(defaults);

        if let Some(file) = &overrides.settings_file {
            builder = builder.add_source(File::new(file, file_format(Path::new(file))));
        }

        builder = builder
            .add_source(
                Environment::with_prefix("PORTICO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(env.clone())),
            )
            .set_override_option("port", env.get("PORT").cloned())?
            .set_override_option("static_dir", env.get("STATIC_DIR").cloned())?
            .set_override_option("host", overrides.host.clone())?
            .set_override_option("port", overrides.port.map(i64::from))?
            .set_override_option("static_dir", overrides.static_dir.clone())?
            .set_override_option("proxy_config", overrides.proxy_config.clone())?
            .set_override_option(
                "log.format",
                overrides.log_format.map(|format| match format {
                    LogFormat::Json => "json",
                    LogFormat::Pretty => "pretty",
                }),
            )?;

        let mut settings: ServerSettings = builder
            .build()
            .wrap_err("Failed to build settings")?
            .try_deserialize()
            .wrap_err("Failed to deserialize settings")?;
        settings.settings_file = overrides.settings_file.as_ref().map(PathBuf::from);

        Ok(settings)
    }

    /// Build the immutable configuration shared with plugins.
    pub fn plugin_config(&self) -> Result<PluginConfig> {
        PluginConfig::builder()
            .static_dir(self.static_dir.clone())
            .port(self.port)
            .proxy_config_path(self.proxy_config.as_ref())
            .extensions(self.plugin_config.clone())
            .build()
            .map_err(|e| eyre::eyre!("Invalid plugin configuration: {e}"))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Toml,
    }
}
