use crate::connection::ProxyConnection;
use crate::error::Result;
use crate::limiter::RateLimiterRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Accepts clients and relays each one to the upstream server on its own
/// task.
#[derive(Clone)]
pub struct ProxyServer {
    upstream_addr: String,
    registry: Arc<RateLimiterRegistry>,
    active: Arc<AtomicUsize>,
}

/// Counts a connection as active for as long as it lives.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ProxyServer {
    pub fn new(upstream_addr: impl Into<String>, registry: Arc<RateLimiterRegistry>) -> Self {
        Self {
            upstream_addr: upstream_addr.into(),
            registry,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<RateLimiterRegistry> {
        &self.registry
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Relays one client until either side closes.
    pub async fn accept_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let _guard = ActiveGuard::new(self.active.clone());
        ProxyConnection::new(
            stream,
            peer,
            self.upstream_addr.clone(),
            self.registry.clone(),
        )
        .relay()
        .await
    }

    /// Runs the accept loop. A failed accept or connection is logged and the
    /// loop carries on.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        info!(
            "Proxy listening on {}, forwarding to {}",
            listener.local_addr()?,
            self.upstream_addr
        );

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.accept_connection(stream, peer).await {
                            error!("Connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
