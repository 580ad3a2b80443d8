use parking_lot::Mutex;
use std::num::NonZeroU64;
use std::time::Duration;
use tokio::time::Instant;

/// Shortest pause between two refill checks of a starved bucket.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Byte-rate limiter using the token bucket algorithm.
///
/// Tokens are bytes. The bucket starts full, refills continuously at `rate`
/// bytes per second and never holds more than `capacity`. Refill is computed
/// from elapsed time whenever the bucket is touched; there is no background
/// timer.
pub struct TokenBucket {
    rate: u64,
    capacity: u64,
    state: Mutex<BucketState>,
    /// Serializes `consume` callers so waiters are served in arrival order.
    turn: tokio::sync::Mutex<()>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: NonZeroU64, capacity: NonZeroU64) -> Self {
        Self {
            rate: rate.get(),
            capacity: capacity.get(),
            state: Mutex::new(BucketState {
                tokens: capacity.get() as f64,
                last_refill: Instant::now(),
            }),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    /// Bucket whose burst allowance equals one second of traffic.
    pub fn with_rate(rate: NonZeroU64) -> Self {
        Self::new(rate, rate)
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Try to consume tokens without waiting, returns true if allowed.
    ///
    /// Does not queue behind pending `consume` calls.
    pub fn try_consume(&self, bytes: u64) -> bool {
        let mut state = self.state.lock();
        state.refill(self.rate, self.capacity);

        if state.tokens >= bytes as f64 {
            state.tokens -= bytes as f64;
            true
        } else {
            false
        }
    }

    /// Wait until `bytes` tokens have been debited.
    ///
    /// Requests larger than the capacity are debited one capacity-sized slice
    /// at a time. There is no timeout: a starved caller waits as long as the
    /// refill rate requires.
    pub async fn consume(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }

        let _turn = self.turn.lock().await;
        let mut outstanding = bytes;
        while outstanding > 0 {
            let slice = outstanding.min(self.capacity);
            while let Some(wait) = self.debit_or_wait(slice) {
                tokio::time::sleep(wait).await;
            }
            outstanding -= slice;
        }
    }

    /// Current token count, for diagnostics only.
    pub fn available(&self) -> u64 {
        let state = self.state.lock();
        let elapsed = Instant::now().duration_since(state.last_refill);
        let tokens = state.tokens + elapsed.as_secs_f64() * self.rate as f64;
        tokens.min(self.capacity as f64) as u64
    }

    /// Debits `bytes` if possible, otherwise returns how long the deficit
    /// takes to refill.
    fn debit_or_wait(&self, bytes: u64) -> Option<Duration> {
        let mut state = self.state.lock();
        state.refill(self.rate, self.capacity);

        let wanted = bytes as f64;
        if state.tokens >= wanted {
            state.tokens -= wanted;
            return None;
        }

        let deficit = wanted - state.tokens;
        Some(Duration::from_secs_f64(deficit / self.rate as f64).max(MIN_WAIT))
    }
}

impl BucketState {
    fn refill(&mut self, rate: u64, capacity: u64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let new_tokens = elapsed.as_secs_f64() * rate as f64;

        self.tokens = (self.tokens + new_tokens).min(capacity as f64);
        self.last_refill = now;
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn rate(bytes_per_second: u64) -> NonZeroU64 {
        NonZeroU64::new(bytes_per_second).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_consume_drains_bucket() {
        let bucket = TokenBucket::with_rate(rate(1000));
        assert!(bucket.try_consume(500));
        assert!(bucket.try_consume(500));
        assert!(!bucket.try_consume(100)); // Should fail, no tokens left
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_full() {
        let bucket = TokenBucket::new(rate(100), rate(250));
        assert_eq!(bucket.available(), 250);
        assert_eq!(bucket.capacity(), 250);
        assert_eq!(bucket.rate(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_never_exceeds_capacity() {
        let bucket = TokenBucket::with_rate(rate(1000));
        assert!(bucket.try_consume(1000));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(bucket.available(), 1000);
        assert!(!bucket.try_consume(1001));
        assert!(bucket.try_consume(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_rate_proportional() {
        let bucket = TokenBucket::with_rate(rate(1000));
        assert!(bucket.try_consume(1000));

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(bucket.available(), 250);
        assert!(!bucket.try_consume(300));
        assert!(bucket.try_consume(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_bucket_waits_a_full_second() {
        let bucket = TokenBucket::with_rate(rate(1000));
        assert!(bucket.try_consume(1000));
        assert!(!bucket.try_consume(1));

        let start = Instant::now();
        bucket.consume(1000).await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(bucket.available() < 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_within_budget_does_not_wait() {
        let bucket = TokenBucket::with_rate(rate(1000));
        let start = Instant::now();
        bucket.consume(400).await;
        bucket.consume(0).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(bucket.available(), 600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_larger_than_capacity_completes() {
        let bucket = TokenBucket::with_rate(rate(100));
        let start = Instant::now();
        bucket.consume(350).await;
        // 100 from the initial burst, the remaining 250 at 100 bytes/sec.
        assert!(start.elapsed() >= Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_bucket_limits_aggregate() {
        let bucket = Arc::new(TokenBucket::with_rate(rate(1000)));
        let start = Instant::now();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let bucket = bucket.clone();
                tokio::spawn(async move { bucket.consume(1000).await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        // 4000 bytes against a 1000-byte burst at 1000 bytes/sec.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
