//! Middleware for the signing service.

pub mod auth;
pub mod rate_limit;

pub use auth::InternalAuth;
pub use rate_limit::{RateLimitConfig, RateLimiter, sign_limiter};
