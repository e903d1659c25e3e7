pub mod file_system;
pub mod http_client;
pub mod http_handler;
pub mod middleware;
pub mod proxy;
pub mod router;

/// Re-export commonly used types from adapters
pub use file_system::FileSystemAdapter;
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use proxy::{LoggingObserver, ProxyHandler};
pub use router::{HEALTH_PATH, build_router};
