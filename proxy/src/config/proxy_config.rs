use crate::error::{ProxyError, Result};

/// Process settings resolved from the command line and environment.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: String,
    pub upstream_host: String,
    pub upstream_port: u16,
    /// Admin API listen address; the API is disabled when unset.
    pub api_addr: Option<String>,
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
    /// Log directory for file-based logging
    pub log_dir: Option<String>,
    pub log_file: String,
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.upstream_host.trim().is_empty() {
            return Err(ProxyError::Configuration(
                "upstream host must not be empty".to_string(),
            ));
        }
        if self.upstream_port == 0 {
            return Err(ProxyError::Configuration(
                "upstream port must be in 1-65535".to_string(),
            ));
        }
        Ok(())
    }

    pub fn upstream_addr(&self) -> String {
        if self.upstream_host.contains(':') && !self.upstream_host.starts_with('[') {
            format!("[{}]:{}", self.upstream_host, self.upstream_port)
        } else {
            format!("{}:{}", self.upstream_host, self.upstream_port)
        }
    }
}
