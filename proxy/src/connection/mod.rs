mod metered;
mod upstream;

pub use metered::MeteredForwarder;

use crate::error::{ProxyError, Result};
use crate::limiter::RateLimiterRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

/// One accepted client and the upstream connection dialed for it.
///
/// Client-to-upstream bytes are parsed and metered. Upstream-to-client bytes
/// are copied through untouched. The first flow to finish ends both.
pub struct ProxyConnection {
    client: TcpStream,
    peer: SocketAddr,
    upstream_addr: String,
    registry: Arc<RateLimiterRegistry>,
}

impl ProxyConnection {
    pub fn new(
        client: TcpStream,
        peer: SocketAddr,
        upstream_addr: String,
        registry: Arc<RateLimiterRegistry>,
    ) -> Self {
        Self {
            client,
            peer,
            upstream_addr,
            registry,
        }
    }

    #[instrument(skip(self), fields(peer = %self.peer, upstream = %self.upstream_addr))]
    pub async fn relay(self) -> Result<()> {
        // On failure the client stream is dropped here, which closes it.
        let upstream = upstream::connect(&self.upstream_addr).await?;
        self.client.set_nodelay(true)?;

        let (client_read, mut client_write) = self.client.into_split();
        let (mut upstream_read, upstream_write) = upstream.into_split();
        let mut metered = MeteredForwarder::new(upstream_write, self.registry);

        let mut received = None;
        let result = tokio::select! {
            result = metered.forward(client_read) => {
                debug!("Client closed its side");
                result
            }
            result = tokio::io::copy(&mut upstream_read, &mut client_write) => {
                debug!("Upstream closed its side");
                result.map(|n| received = Some(n)).map_err(ProxyError::from)
            }
        };

        debug!(
            "Connection closed, user: {}, client->upstream: {} bytes, upstream->client: {}",
            metered.user().unwrap_or("<anonymous>"),
            metered.forwarded(),
            received.map_or_else(|| "unknown".to_string(), |n| format!("{} bytes", n))
        );
        result
    }
}
