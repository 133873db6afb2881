//! Token-bucket rate limiting for outbound model calls.

use crate::config::RateLimitConfig;
use crate::error::{AgentError, Result};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: holds up to `capacity` tokens, refilled continuously at
/// `refill_per_second`. Each call consumes one token.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_second: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_second: f64) -> Result<Self> {
        RateLimitConfig {
            capacity,
            refill_per_second,
        }
        .validate()?;

        Ok(Self {
            capacity: f64::from(capacity),
            refill_per_second,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self> {
        Self::new(config.capacity, config.refill_per_second)
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Take a token without waiting.
    ///
    /// Returns the time until the next token is available when the bucket is empty.
    fn take(&self) -> std::result::Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::try_from_secs_f64(missing / self.refill_per_second).unwrap_or(Duration::MAX))
        }
    }

    /// Take a token, failing with [`AgentError::RateLimited`] if none is available
    pub fn try_acquire(&self) -> Result<()> {
        self.take().map_err(|wait| {
            AgentError::RateLimited(format!("next token in {}ms", wait.as_millis()))
        })
    }

    /// Wait until a token is available, then take it
    pub async fn acquire(&self) {
        loop {
            match self.take() {
                Ok(()) => return,
                Err(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "Rate limited, waiting for token");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Whole tokens currently available
    pub fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut bucket);
        bucket.tokens.floor() as u32
    }
}
