//! Bandwidth limiting for part bodies

use parcel_core::{ParcelError, Result};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Shared byte budget consulted before every read of a part body
pub trait RateLimiter: Send + Sync {
    /// Ask for up to `want` bytes
    ///
    /// Returns the number of bytes granted (at least one, at most `want`),
    /// or how long to wait before asking again.
    fn acquire(&self, want: u64) -> std::result::Result<u64, Duration>;
}

impl std::fmt::Debug for dyn RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RateLimiter")
    }
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Token bucket refilled at `rate` bytes per second, holding at most
/// `capacity` bytes
///
/// Grants are partial: a read larger than the bucket gets what is available,
/// so no request ever waits for more than `capacity` tokens.
pub struct TokenBucketRateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucketRateLimiter {
    /// Create a limiter that starts full
    pub fn new(rate: u64, capacity: u64) -> Result<Self> {
        if rate == 0 || capacity == 0 {
            return Err(ParcelError::invalid_input(
                "rate limiter rate and capacity must be positive",
            ));
        }
        Ok(TokenBucketRateLimiter {
            rate: rate as f64,
            capacity: capacity as f64,
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                refilled_at: Instant::now(),
            }),
        })
    }

    pub fn rate(&self) -> u64 {
        self.rate as u64
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }
}

impl RateLimiter for TokenBucketRateLimiter {
    fn acquire(&self, want: u64) -> std::result::Result<u64, Duration> {
        let want = want.max(1);
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            let granted = (bucket.tokens.floor() as u64).min(want);
            bucket.tokens -= granted as f64;
            return Ok(granted);
        }

        let needed = (want as f64).min(self.capacity) - bucket.tokens;
        Err(Duration::from_secs_f64(needed / self.rate))
    }
}
