mod bandwidth_config;
mod proxy_config;

pub use bandwidth_config::{BandwidthConfig, BandwidthDocument, DEFAULT_BANDWIDTH};
pub use proxy_config::ProxyConfig;
