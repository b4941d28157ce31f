//! Message Repository Implementation
//!
//! PostgreSQL implementation of the MessageRepository trait. Ids come from
//! a `BIGSERIAL` column, so they increase in insertion order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{MessageReceipt, MessageRepository, StoredMessage};
use crate::shared::error::AppError;

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    user_id: Uuid,
    username: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> StoredMessage {
        StoredMessage {
            id: self.id,
            user_id: self.user_id,
            username: self.username,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(
        &self,
        user_id: Uuid,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<MessageReceipt, AppError> {
        let (id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            r#"
            INSERT INTO messages (user_id, content, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, created_at
            "#,
        )
        .bind(user_id)
        .bind(content)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(MessageReceipt { id, created_at })
    }

    async fn list_recent(
        &self,
        limit: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StoredMessage>, AppError> {
        // Newest `limit` rows, flipped back to chronological order
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, user_id, username, content, created_at FROM (
                SELECT m.id, m.user_id, u.username, m.content, m.created_at
                FROM messages m
                JOIN users u ON u.id = m.user_id
                WHERE $2::timestamptz IS NULL OR m.created_at > $2
                ORDER BY m.id DESC
                LIMIT $1
            ) recent
            ORDER BY id ASC
            "#,
        )
        .bind(limit)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }
}
