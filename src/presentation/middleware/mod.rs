//! Middleware
//!
//! Tower middleware for request processing.

pub mod auth;
pub mod cors;
pub mod rate_limit;

pub use auth::{auth_middleware, AuthUser};
pub use rate_limit::{client_ip, rate_limit_ip, IpRateLimiter};
