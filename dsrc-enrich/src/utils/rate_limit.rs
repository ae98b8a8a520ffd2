//! Shared request rate limiter for outbound API clients

use crate::error::{EnrichError, EnrichResult};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Unkeyed in-memory limiter shared by every request of one client
pub type DirectLimiter = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Build a limiter allowing `requests_per_second` requests with no burst
pub fn build_limiter(requests_per_second: u32) -> EnrichResult<Arc<DirectLimiter>> {
    let rate = NonZeroU32::new(requests_per_second).ok_or_else(|| {
        EnrichError::InvalidInput("requests_per_second must be > 0".to_string())
    })?;
    let quota = governor::Quota::per_second(rate).allow_burst(NonZeroU32::MIN);
    Ok(Arc::new(governor::RateLimiter::direct(quota)))
}
