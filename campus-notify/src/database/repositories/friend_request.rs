//! Friend-request source repository. Accept/reject belongs to the friend subsystem.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::FriendRequestDbModel;

#[async_trait]
pub trait FriendRequestRepository: Send + Sync {
    async fn list_pending(&self, addressee: &str, limit: i64) -> Result<Vec<FriendRequestDbModel>>;
}

pub struct SqlxFriendRequestRepository {
    pool: SqlitePool,
}

impl SqlxFriendRequestRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        requester_id: &str,
        requester_name: &str,
        addressee_id: &str,
        message: Option<&str>,
        created_at: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO friend_request (requester_id, requester_name, addressee_id, message, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(requester_id)
        .bind(requester_name)
        .bind(addressee_id)
        .bind(message)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl FriendRequestRepository for SqlxFriendRequestRepository {
    async fn list_pending(&self, addressee: &str, limit: i64) -> Result<Vec<FriendRequestDbModel>> {
        let rows = sqlx::query_as::<_, FriendRequestDbModel>(
            r#"
            SELECT * FROM friend_request
            WHERE addressee_id = ? AND status = 'pending'
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(addressee)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
