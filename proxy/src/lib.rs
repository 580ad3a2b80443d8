pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod limiter;
pub mod server;

pub use config::{BandwidthConfig, ProxyConfig};
pub use connection::{MeteredForwarder, ProxyConnection};
pub use error::{ProxyError, Result};
pub use limiter::RateLimiterRegistry;
pub use server::ProxyServer;
