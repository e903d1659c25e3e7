pub mod client_ip;
pub mod graceful_shutdown;

pub use client_ip::ClientIdentity;
pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
