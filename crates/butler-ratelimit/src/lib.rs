mod bucket;
mod limiter;

pub use limiter::{AdmissionResult, LimitType, RateLimiter, RateLimiterConfig};
