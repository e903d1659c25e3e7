//! Plugins shipped with the binary.
use std::sync::Arc;

use crate::core::plugin::PluginRegistry;

pub mod app_config;
pub mod hello;

pub use app_config::AppConfigPlugin;
pub use hello::HelloPlugin;

/// Registry pre-filled with the built-in plugins.
pub fn builtin() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry
        .register(Arc::new(HelloPlugin))
        .register(Arc::new(AppConfigPlugin));
    registry
}
