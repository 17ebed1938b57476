//! Chat-unread source repository. Read-only: read state belongs to the chat subsystem.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::ChatUnreadDbModel;

#[async_trait]
pub trait ChatUnreadRepository: Send + Sync {
    async fn list_unread(&self, recipient: &str, limit: i64) -> Result<Vec<ChatUnreadDbModel>>;
}

pub struct SqlxChatUnreadRepository {
    pool: SqlitePool,
}

impl SqlxChatUnreadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        room_id: &str,
        recipient_id: &str,
        sender_name: &str,
        content: &str,
        created_at: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO chat_unread (room_id, recipient_id, sender_name, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(room_id)
        .bind(recipient_id)
        .bind(sender_name)
        .bind(content)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl ChatUnreadRepository for SqlxChatUnreadRepository {
    async fn list_unread(&self, recipient: &str, limit: i64) -> Result<Vec<ChatUnreadDbModel>> {
        let rows = sqlx::query_as::<_, ChatUnreadDbModel>(
            r#"
            SELECT * FROM chat_unread
            WHERE recipient_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(recipient)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
