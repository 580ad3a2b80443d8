use anyhow::{Context, Result};
use clap::Parser;
use proxy::{BandwidthConfig, ProxyConfig, ProxyServer, RateLimiterRegistry, api};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "nats-limiter-proxy")]
#[command(about = "NATS proxy that limits publish bandwidth per user", long_about = None)]
struct Args {
    /// Bandwidth config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Proxy listen address
    #[arg(long, env = "PROXY_LISTEN_ADDR", default_value = "0.0.0.0:4223")]
    listen_addr: String,

    /// Upstream NATS host
    #[arg(long, env = "UPSTREAM_HOST", value_parser = clap::builder::NonEmptyStringValueParser::new())]
    upstream_host: String,

    /// Upstream NATS port
    #[arg(long, env = "UPSTREAM_PORT", value_parser = clap::value_parser!(u16).range(1..))]
    upstream_port: u16,

    /// Admin API listen address
    #[arg(long, env = "PROXY_API_ADDR")]
    api_addr: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Write logs to daily rolling files in this directory
    #[arg(long, env = "LOG_DIR")]
    log_dir: Option<String>,
}

impl From<Args> for ProxyConfig {
    fn from(args: Args) -> Self {
        ProxyConfig {
            listen_addr: args.listen_addr,
            upstream_host: args.upstream_host,
            upstream_port: args.upstream_port,
            api_addr: args.api_addr,
            log_level: args.log_level,
            log_dir: args.log_dir,
            log_file: "nats-limiter-proxy.log".to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone();
    let cfg = ProxyConfig::from(args);
    cfg.validate()?;

    // Keep the guard alive for the whole process so file logs are flushed.
    let _log_guard = common::init_tracing(cfg.log_dir.as_deref(), &cfg.log_file, &cfg.log_level);

    let bandwidth = BandwidthConfig::load(&config_path)
        .with_context(|| format!("Failed to load bandwidth config from {}", config_path))?;
    info!(
        "Loaded bandwidth config: default {} bytes/s, {} user overrides",
        bandwidth.default_bandwidth(),
        bandwidth.users().len()
    );

    let registry = Arc::new(RateLimiterRegistry::new(Arc::new(bandwidth)));
    let server = ProxyServer::new(cfg.upstream_addr(), registry);

    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;

    let proxy_server = {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(listener).await {
                error!("Proxy server error: {}", e);
            }
        })
    };

    let api_server = match &cfg.api_addr {
        Some(api_addr) => {
            let api_listener = TcpListener::bind(api_addr)
                .await
                .with_context(|| format!("Failed to bind admin API on {}", api_addr))?;
            let server = server.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = api::serve(api_listener, server).await {
                    error!("API server error: {}", e);
                }
            }))
        }
        None => None,
    };

    info!("Proxy started successfully");

    let api_stopped = async {
        match api_server {
            Some(handle) => {
                let _ = handle.await;
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = proxy_server => {
            error!("Proxy server stopped");
        }
        _ = api_stopped => {
            error!("API server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down proxy");
    Ok(())
}
