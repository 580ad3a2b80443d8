use crate::error::Result;
use crate::limiter::RateLimiterRegistry;
use common::TokenBucket;
use futures::StreamExt;
use protocol::FrameCodec;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// Segment bytes shown in debug logs.
const LOGGED_PREFIX: usize = 128;

/// Client-to-upstream flow: parses client traffic into segments and debits
/// each one from the active bucket before writing it upstream.
pub struct MeteredForwarder<W> {
    writer: W,
    registry: Arc<RateLimiterRegistry>,
    /// Private default-rate bucket until the client authenticates, then the
    /// user's shared bucket.
    bucket: Option<Arc<TokenBucket>>,
    user: Option<String>,
    forwarded: u64,
}

impl<W: AsyncWrite + Unpin> MeteredForwarder<W> {
    pub fn new(writer: W, registry: Arc<RateLimiterRegistry>) -> Self {
        Self {
            writer,
            registry,
            bucket: None,
            user: None,
            forwarded: 0,
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Forwards until the reader reaches end of stream.
    pub async fn forward<R: AsyncRead + Unpin>(&mut self, reader: R) -> Result<()> {
        let mut segments = FramedRead::new(reader, FrameCodec::new());

        while let Some(segment) = segments.next().await {
            let segment = segment?;
            if let Some(identity) = segment.identity {
                self.authenticate(identity);
            }

            debug!(
                "client->upstream [{}] {} bytes: {:?}",
                self.user.as_deref().unwrap_or("<anonymous>"),
                segment.bytes.len(),
                String::from_utf8_lossy(logged_prefix(&segment.bytes))
            );

            let bucket = self.active_bucket();
            bucket.consume(segment.bytes.len() as u64).await;
            self.writer.write_all(&segment.bytes).await?;
            self.forwarded += segment.bytes.len() as u64;
        }

        self.writer.flush().await?;
        Ok(())
    }

    /// Switches to the user's bucket. Only the first identity counts.
    fn authenticate(&mut self, identity: String) {
        match self.user.as_deref() {
            Some(current) if current == identity => {}
            Some(current) => {
                warn!(
                    "Ignoring second identity {} on connection of user {}",
                    identity, current
                );
            }
            None => {
                if let Some(limiter) = self.registry.get_limiter(&identity) {
                    info!(
                        "User {} authenticated, limiting to {} bytes/s",
                        identity,
                        limiter.rate()
                    );
                    self.bucket = Some(limiter);
                    self.user = Some(identity);
                }
            }
        }
    }

    fn active_bucket(&mut self) -> Arc<TokenBucket> {
        self.bucket
            .get_or_insert_with(|| {
                let rate = self.registry.default_bandwidth();
                debug!("Metering unauthenticated traffic at {} bytes/s", rate);
                Arc::new(TokenBucket::with_rate(rate))
            })
            .clone()
    }
}

fn logged_prefix(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len().min(LOGGED_PREFIX)]
}
