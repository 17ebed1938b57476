//! Direct-message source repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{DirectMessageDbModel, SourceFilter};
use crate::{Error, Result};

/// Which records a delete applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteScope {
    Ids(Vec<i64>),
    All,
}

/// Direct-message repository trait.
///
/// Every call is scoped to the recipient; one identity can never touch another's rows.
#[async_trait]
pub trait DirectMessageRepository: Send + Sync {
    async fn list(&self, recipient: &str, filter: &SourceFilter) -> Result<Vec<DirectMessageDbModel>>;
    async fn get(&self, recipient: &str, id: i64) -> Result<DirectMessageDbModel>;
    async fn mark_read(&self, recipient: &str, ids: &[i64]) -> Result<u64>;
    async fn mark_all_read(&self, recipient: &str) -> Result<u64>;
    async fn mark_processed(&self, recipient: &str, id: i64) -> Result<u64>;
    async fn delete(&self, recipient: &str, scope: &DeleteScope) -> Result<u64>;
}

/// SQLx implementation of DirectMessageRepository.
pub struct SqlxDirectMessageRepository {
    pool: SqlitePool,
}

impl SqlxDirectMessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a message on behalf of the owning subsystem. Returns the new id.
    pub async fn create(&self, message: &DirectMessageDbModel) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO direct_message (
                recipient_id, sender_id, sender_name, category, severity, title, body,
                link, requires_action, is_read, is_processed, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.recipient_id)
        .bind(&message.sender_id)
        .bind(&message.sender_name)
        .bind(&message.category)
        .bind(&message.severity)
        .bind(&message.title)
        .bind(&message.body)
        .bind(&message.link)
        .bind(message.requires_action)
        .bind(message.is_read)
        .bind(message.is_processed)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl DirectMessageRepository for SqlxDirectMessageRepository {
    async fn list(&self, recipient: &str, filter: &SourceFilter) -> Result<Vec<DirectMessageDbModel>> {
        let read_flag = filter.read_flag();
        let rows = sqlx::query_as::<_, DirectMessageDbModel>(
            r#"
            SELECT * FROM direct_message
            WHERE recipient_id = ?
              AND (? IS NULL OR is_read = ?)
              AND (? IS NULL OR created_at >= ?)
              AND (? IS NULL OR created_at <= ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(recipient)
        .bind(read_flag)
        .bind(read_flag)
        .bind(filter.since_ms)
        .bind(filter.since_ms)
        .bind(filter.until_ms)
        .bind(filter.until_ms)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get(&self, recipient: &str, id: i64) -> Result<DirectMessageDbModel> {
        sqlx::query_as::<_, DirectMessageDbModel>(
            "SELECT * FROM direct_message WHERE id = ? AND recipient_id = ?",
        )
        .bind(id)
        .bind(recipient)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("DirectMessage", id.to_string()))
    }

    async fn mark_read(&self, recipient: &str, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids_json = serde_json::to_string(ids)?;
        let result = sqlx::query(
            r#"
            UPDATE direct_message SET is_read = 1
            WHERE recipient_id = ?
              AND is_read = 0
              AND id IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(recipient)
        .bind(&ids_json)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_all_read(&self, recipient: &str) -> Result<u64> {
        let result =
            sqlx::query("UPDATE direct_message SET is_read = 1 WHERE recipient_id = ? AND is_read = 0")
                .bind(recipient)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn mark_processed(&self, recipient: &str, id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE direct_message SET is_processed = 1, is_read = 1
            WHERE id = ? AND recipient_id = ? AND requires_action = 1
            "#,
        )
        .bind(id)
        .bind(recipient)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, recipient: &str, scope: &DeleteScope) -> Result<u64> {
        let result = match scope {
            DeleteScope::All => {
                sqlx::query("DELETE FROM direct_message WHERE recipient_id = ?")
                    .bind(recipient)
                    .execute(&self.pool)
                    .await?
            }
            DeleteScope::Ids(ids) => {
                if ids.is_empty() {
                    return Ok(0);
                }
                let ids_json = serde_json::to_string(ids)?;
                sqlx::query(
                    r#"
                    DELETE FROM direct_message
                    WHERE recipient_id = ?
                      AND id IN (SELECT value FROM json_each(?))
                    "#,
                )
                .bind(recipient)
                .bind(&ids_json)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected())
    }
}
