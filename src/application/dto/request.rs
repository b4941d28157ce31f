//! Request DTOs
//!
//! Form bodies and query strings accepted by the HTTP layer.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

/// Login form
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Signup form
#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 2, max = 32, message = "Username must be 2-32 characters"))]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
}

/// Query string for `GET /messages`
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,

    /// Only messages created strictly after this instant (RFC 3339)
    pub since: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    /// Requested limit clamped to `1..=max`.
    pub fn effective_limit(&self, max: i64) -> i64 {
        self.limit.unwrap_or(max).clamp(1, max.max(1))
    }
}
