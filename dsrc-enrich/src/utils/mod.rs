//! Utility modules for dsrc-enrich

pub mod db_retry;
pub mod rate_limit;

pub use db_retry::retry_on_lock;
pub use rate_limit::{build_limiter, DirectLimiter};
