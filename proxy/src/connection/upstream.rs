use crate::error::{ProxyError, Result};
use tokio::net::TcpStream;
use tracing::debug;

/// Dials the upstream server.
pub async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| ProxyError::Upstream {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;
    debug!("Connected to upstream {}", addr);
    Ok(stream)
}
