//! C4 — rate limiter: a standalone token bucket plus a load-adaptive
//! multi-identifier limiter built on top of it.

pub mod adaptive;
pub mod bucket;

pub use adaptive::{AdaptiveLimiter, LoadSample};
pub use bucket::TokenBucket;
