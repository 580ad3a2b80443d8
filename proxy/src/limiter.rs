use crate::config::BandwidthConfig;
use common::TokenBucket;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::sync::Arc;
use tracing::{debug, info};

/// Hands out one shared token bucket per identity so every connection of a
/// user draws from the same budget.
pub struct RateLimiterRegistry {
    config: Arc<BandwidthConfig>,
    limiters: RwLock<HashMap<String, Arc<TokenBucket>>>,
}

impl RateLimiterRegistry {
    pub fn new(config: Arc<BandwidthConfig>) -> Self {
        Self {
            config,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the bucket for `username`, creating it on first use.
    ///
    /// An empty username is unauthenticated traffic and gets no bucket.
    pub fn get_limiter(&self, username: &str) -> Option<Arc<TokenBucket>> {
        if username.is_empty() {
            return None;
        }

        if let Some(limiter) = self.limiters.read().get(username) {
            return Some(limiter.clone());
        }

        let mut limiters = self.limiters.write();
        // Another connection may have created it between the two locks.
        if let Some(limiter) = limiters.get(username) {
            return Some(limiter.clone());
        }

        let rate = self.config.bandwidth_for(username);
        let limiter = Arc::new(TokenBucket::with_rate(rate));
        limiters.insert(username.to_string(), limiter.clone());
        info!("Created rate limiter for user {} at {} bytes/s", username, rate);

        Some(limiter)
    }

    /// Drops the bucket of `username`. Connections already holding it keep
    /// using it; new lookups start from a full bucket.
    pub fn remove_limiter(&self, username: &str) -> bool {
        let removed = self.limiters.write().remove(username).is_some();
        if removed {
            debug!("Removed rate limiter for user {}", username);
        }
        removed
    }

    /// Available tokens per user.
    pub fn stats(&self) -> BTreeMap<String, u64> {
        self.limiters
            .read()
            .iter()
            .map(|(username, limiter)| (username.clone(), limiter.available()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.limiters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rate of the private bucket each connection uses before it
    /// authenticates.
    pub fn default_bandwidth(&self) -> NonZeroU64 {
        self.config.default_bandwidth()
    }
}
