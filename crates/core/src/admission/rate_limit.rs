//! Per-client token bucket rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Buckets kept before idle, full ones are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

/// Token bucket refilled at a constant rate.
///
/// The bucket starts full, so a new client may burst up to the capacity.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = f64::from(requests_per_minute);
        Self {
            capacity,
            tokens: capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Takes a token, or returns how long until one is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let wait = (1.0 - self.tokens) / self.refill_rate;
            Err(Duration::from_secs_f64(wait))
        }
    }

    fn is_full(&mut self) -> bool {
        self.refill();
        self.tokens >= self.capacity
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Rate limiter keyed by client address.
pub struct ClientRateLimiter {
    requests_per_minute: u32,
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
}

impl ClientRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    /// Charges one request to `client`. On refusal returns the wait until
    /// the next request would be accepted.
    pub async fn check(&self, client: IpAddr) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().await;
        if buckets.len() >= PRUNE_THRESHOLD {
            buckets.retain(|_, bucket| !bucket.is_full());
        }
        buckets
            .entry(client)
            .or_insert_with(|| TokenBucket::new(self.requests_per_minute))
            .try_acquire()
    }
}
