pub mod gateway;
pub mod plugin;
pub mod rate_limiter;

pub use gateway::{GatewayService, ProxyRoute};
pub use plugin::{Plugin, PluginLoadError, PluginLoadReport, PluginRecord, PluginRegistry, PluginRoutes};
pub use rate_limiter::{ClientRateLimiter, RateLimitDecision, RateLimitTier};
