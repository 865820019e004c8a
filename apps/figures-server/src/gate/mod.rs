//! Request Gate
//!
//! Front door for every extraction and download request: per-client rate
//! limiting and correlation ID issuance.

pub mod correlation;
pub mod middleware;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

pub use correlation::CorrelationId;
pub use middleware::{client_key, request_gate, CLIENT_ID_HEADER, REQUEST_ID_HEADER};
pub use rate_limit::{RateLimitExceeded, RateLimiter};

use crate::clock::Clock;

#[derive(Clone)]
pub struct RequestGate {
    limiter: Arc<RateLimiter>,
}

impl RequestGate {
    pub fn new(quota: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new(quota, window, clock)),
        }
    }

    /// Admit one request from `client_key`, issuing its correlation ID
    pub fn admit(&self, client_key: &str) -> Result<CorrelationId, RateLimitExceeded> {
        self.limiter.check(client_key)?;
        Ok(CorrelationId::new())
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
