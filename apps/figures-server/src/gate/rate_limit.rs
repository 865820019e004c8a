//! Fixed-window rate limiting
//!
//! One counter per client key. A window starts with the first request
//! of that key and is realigned on a multiple of the window length, so a
//! request landing exactly on the boundary opens the next window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;

use crate::clock::Clock;

/// Buckets are pruned once the map holds this many keys
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Rate limit of {limit} requests exceeded, retry after {}s", retry_after.as_secs())]
pub struct RateLimitExceeded {
    pub limit: u32,
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// Whole seconds for the `Retry-After` header, never zero
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs.max(1)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_start: DateTime<Utc>,
    count: u32,
}

pub struct RateLimiter {
    quota: u32,
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// `quota` of zero disables limiting
    pub fn new(quota: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let window = chrono::Duration::from_std(window)
            .unwrap_or(chrono::Duration::MAX)
            .max(chrono::Duration::milliseconds(1));
        Self {
            quota,
            window,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.quota > 0
    }

    /// Count one request for `key`; rejected requests are not counted
    pub fn check(&self, key: &str) -> Result<(), RateLimitExceeded> {
        if !self.is_enabled() {
            return Ok(());
        }

        let now = self.clock.now();
        let mut buckets = self.buckets.lock();

        if buckets.len() >= PRUNE_THRESHOLD && !buckets.contains_key(key) {
            Self::prune_locked(&mut buckets, now, self.window);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            window_start: now,
            count: 0,
        });

        let elapsed = now - bucket.window_start;
        if elapsed >= self.window {
            let window_ms = self.window.num_milliseconds().max(1);
            let into_window = elapsed.num_milliseconds() % window_ms;
            bucket.window_start = now - chrono::Duration::milliseconds(into_window);
            bucket.count = 0;
        }

        if bucket.count < self.quota {
            bucket.count += 1;
            return Ok(());
        }

        let remaining = match bucket.window_start.checked_add_signed(self.window) {
            Some(window_end) => window_end - now,
            None => self.window - (now - bucket.window_start),
        };
        Err(RateLimitExceeded {
            limit: self.quota,
            retry_after: remaining.to_std().unwrap_or(Duration::ZERO),
        })
    }

    /// Drop buckets whose window has passed
    pub fn prune(&self) {
        let now = self.clock.now();
        Self::prune_locked(&mut self.buckets.lock(), now, self.window);
    }

    fn prune_locked(buckets: &mut HashMap<String, Bucket>, now: DateTime<Utc>, window: chrono::Duration) {
        let before = buckets.len();
        buckets.retain(|_, bucket| now - bucket.window_start < window);
        tracing::debug!(pruned = before - buckets.len(), "Pruned idle rate limit buckets");
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().len()
    }
}
