use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Token-bucket limiter keyed by arbitrary strings (`http:<ip>`, `ws:<ip>`,
/// `user:<id>`). Each key gets a bucket of `max_per_minute` tokens refilled
/// at `max_per_minute / 60` per second.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Try to consume one token for `key`. Returns false (without mutating
    /// the bucket) when less than a full token is available.
    pub fn check(&self, key: &str, max_per_minute: u32) -> bool {
        let capacity = max_per_minute as f64;
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            capacity,
            last_refill: now,
        });

        // Capacity changes (settings edits) take effect on the next check.
        bucket.capacity = capacity;
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * capacity / 60.0).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop all buckets (used by tests and settings resets).
    pub fn clear(&self) {
        self.buckets.lock().unwrap().clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
