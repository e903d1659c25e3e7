pub mod loader;
pub mod models;
pub mod settings;
pub mod validation;

pub use loader::{ConfigError, load_proxy_rules, substitute_env_vars};
pub use models::*;
pub use settings::{LogFormat, ServerSettings, SettingsOverrides};
pub use validation::{RuleValidationError, ValidationResult, validate_rule, validate_rules};
