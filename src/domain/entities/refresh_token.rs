//! Refresh token entity and repository trait.
//!
//! Maps to the `refresh_tokens` table. Raw token values never reach storage;
//! rows are keyed by the SHA-256 hex digest of the value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::shared::error::AppError;

/// Server-side record of an issued refresh token.
///
/// Maps to the `refresh_tokens` table:
/// - token_hash: TEXT PRIMARY KEY (SHA-256 hex of the token value)
/// - user_id: UUID NOT NULL REFERENCES users(id)
/// - expires_at: TIMESTAMPTZ NOT NULL
/// - revoked_at: TIMESTAMPTZ NULL
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub token_hash: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(token_hash: String, user_id: Uuid, expires_at: DateTime<Utc>) -> Self {
        Self {
            token_hash,
            user_id,
            expires_at,
            revoked_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Not revoked and not expired.
    pub fn is_active(&self) -> bool {
        !self.is_revoked() && !self.is_expired()
    }
}

/// Repository trait for refresh token storage.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn create(&self, token: &RefreshToken) -> Result<(), AppError>;

    /// Mark a token revoked. Revoking an unknown or already revoked token
    /// is not an error.
    async fn revoke(&self, token_hash: &str) -> Result<(), AppError>;

    /// Atomically revoke a token only if it is currently active, returning
    /// the record as it was before revocation. This is the only lookup by
    /// token; a read without revocation would race with rotation. Of two concurrent callers
    /// presenting the same token at most one receives `Some`.
    async fn consume(&self, token_hash: &str) -> Result<Option<RefreshToken>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_active_token() {
        let token = RefreshToken::new("h".into(), Uuid::new_v4(), Utc::now() + Duration::days(7));
        assert!(token.is_active());
    }

    #[test]
    fn test_expired_token_is_inactive() {
        let token = RefreshToken::new("h".into(), Uuid::new_v4(), Utc::now() - Duration::seconds(1));
        assert!(token.is_expired());
        assert!(!token.is_active());
    }

    #[test]
    fn test_revoked_token_is_inactive() {
        let mut token =
            RefreshToken::new("h".into(), Uuid::new_v4(), Utc::now() + Duration::days(7));
        token.revoked_at = Some(Utc::now());
        assert!(token.is_revoked());
        assert!(!token.is_active());
    }
}
