//! Message entity and repository trait.
//!
//! Maps to the `messages` table in the database schema. Only chat messages
//! are ever stored; typing, presence and rate-limit signals stay in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::error::AppError;

/// A persisted chat message joined with its author's username.
///
/// Maps to the `messages` table:
/// - id: BIGSERIAL PRIMARY KEY
/// - user_id: UUID NOT NULL REFERENCES users(id)
/// - content: TEXT NOT NULL (already sanitized)
/// - created_at: TIMESTAMPTZ NOT NULL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub user_id: Uuid,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Canonical identity assigned to a message when it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageReceipt {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

/// Repository trait for Message data access operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Store a message and return its assigned id and timestamp.
    async fn create(
        &self,
        user_id: Uuid,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<MessageReceipt, AppError>;

    /// The most recent `limit` messages, oldest first. When `since` is set
    /// only messages created strictly after it are returned.
    async fn list_recent(
        &self,
        limit: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StoredMessage>, AppError>;
}
