//! Broadcast-alert source repository.
//!
//! The scope predicate for every call is "targeted at the recipient, or
//! untargeted with a category in the allowed list". Categories are compared
//! lowercased and trimmed; callers pass every accepted spelling.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::direct_message::DeleteScope;
use crate::database::models::{BroadcastAlertDbModel, SourceFilter};
use crate::{Error, Result};

const SCOPE_PREDICATE: &str = "(target_id = ? OR (target_id IS NULL AND lower(trim(category)) IN (SELECT value FROM json_each(?))))";

/// Broadcast-alert repository trait.
#[async_trait]
pub trait BroadcastAlertRepository: Send + Sync {
    async fn list(
        &self,
        recipient: &str,
        categories: &[String],
        filter: &SourceFilter,
    ) -> Result<Vec<BroadcastAlertDbModel>>;
    async fn get(&self, recipient: &str, categories: &[String], id: i64) -> Result<BroadcastAlertDbModel>;
    async fn mark_read(&self, recipient: &str, categories: &[String], ids: &[i64]) -> Result<u64>;
    async fn mark_all_read(&self, recipient: &str, categories: &[String]) -> Result<u64>;
    async fn mark_processed(&self, recipient: &str, categories: &[String], id: i64) -> Result<u64>;
    async fn delete(&self, recipient: &str, categories: &[String], scope: &DeleteScope) -> Result<u64>;
}

/// SQLx implementation of BroadcastAlertRepository.
pub struct SqlxBroadcastAlertRepository {
    pool: SqlitePool,
}

impl SqlxBroadcastAlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an alert on behalf of the admin subsystem. Returns the new id.
    pub async fn create(&self, alert: &BroadcastAlertDbModel) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO broadcast_alert (
                target_id, category, severity, title, body, subject_ref,
                requires_action, is_read, is_processed, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.target_id)
        .bind(&alert.category)
        .bind(&alert.severity)
        .bind(&alert.title)
        .bind(&alert.body)
        .bind(&alert.subject_ref)
        .bind(alert.requires_action)
        .bind(alert.is_read)
        .bind(alert.is_processed)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl BroadcastAlertRepository for SqlxBroadcastAlertRepository {
    async fn list(
        &self,
        recipient: &str,
        categories: &[String],
        filter: &SourceFilter,
    ) -> Result<Vec<BroadcastAlertDbModel>> {
        let categories_json = serde_json::to_string(categories)?;
        let read_flag = filter.read_flag();
        let sql = format!(
            r#"
            SELECT * FROM broadcast_alert
            WHERE {SCOPE_PREDICATE}
              AND (? IS NULL OR is_read = ?)
              AND (? IS NULL OR created_at >= ?)
              AND (? IS NULL OR created_at <= ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#
        );
        let rows = sqlx::query_as::<_, BroadcastAlertDbModel>(&sql)
            .bind(recipient)
            .bind(&categories_json)
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

    async fn get(&self, recipient: &str, categories: &[String], id: i64) -> Result<BroadcastAlertDbModel> {
        let categories_json = serde_json::to_string(categories)?;
        let sql = format!("SELECT * FROM broadcast_alert WHERE id = ? AND {SCOPE_PREDICATE}");
        sqlx::query_as::<_, BroadcastAlertDbModel>(&sql)
            .bind(id)
            .bind(recipient)
            .bind(&categories_json)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("BroadcastAlert", id.to_string()))
    }

    async fn mark_read(&self, recipient: &str, categories: &[String], ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids_json = serde_json::to_string(ids)?;
        let categories_json = serde_json::to_string(categories)?;
        let sql = format!(
            r#"
            UPDATE broadcast_alert SET is_read = 1
            WHERE is_read = 0
              AND id IN (SELECT value FROM json_each(?))
              AND {SCOPE_PREDICATE}
            "#
        );
        let result = sqlx::query(&sql)
            .bind(&ids_json)
            .bind(recipient)
            .bind(&categories_json)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn mark_all_read(&self, recipient: &str, categories: &[String]) -> Result<u64> {
        let categories_json = serde_json::to_string(categories)?;
        let sql = format!("UPDATE broadcast_alert SET is_read = 1 WHERE is_read = 0 AND {SCOPE_PREDICATE}");
        let result = sqlx::query(&sql)
            .bind(recipient)
            .bind(&categories_json)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn mark_processed(&self, recipient: &str, categories: &[String], id: i64) -> Result<u64> {
        let categories_json = serde_json::to_string(categories)?;
        let sql = format!(
            r#"
            UPDATE broadcast_alert SET is_processed = 1, is_read = 1
            WHERE id = ? AND requires_action = 1 AND {SCOPE_PREDICATE}
            "#
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(recipient)
            .bind(&categories_json)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, recipient: &str, categories: &[String], scope: &DeleteScope) -> Result<u64> {
        let categories_json = serde_json::to_string(categories)?;
        let result = match scope {
            DeleteScope::All => {
                let sql = format!("DELETE FROM broadcast_alert WHERE {SCOPE_PREDICATE}");
                sqlx::query(&sql)
                    .bind(recipient)
                    .bind(&categories_json)
                    .execute(&self.pool)
                    .await?
            }
            DeleteScope::Ids(ids) => {
                if ids.is_empty() {
                    return Ok(0);
                }
                let ids_json = serde_json::to_string(ids)?;
                let sql = format!(
                    "DELETE FROM broadcast_alert WHERE id IN (SELECT value FROM json_each(?)) AND {SCOPE_PREDICATE}"
                );
                sqlx::query(&sql)
                    .bind(&ids_json)
                    .bind(recipient)
                    .bind(&categories_json)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_pool_with_size, run_migrations};

    async fn repo() -> SqlxBroadcastAlertRepository {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqlxBroadcastAlertRepository::new(pool)
    }

    fn cats(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_list_applies_scope_predicate() {
        let repo = repo().await;
        repo.create(&BroadcastAlertDbModel::broadcast("system_error", "db down"))
            .await
            .unwrap();
        repo.create(&BroadcastAlertDbModel::broadcast("teacher_password_expired", "expired"))
            .await
            .unwrap();
        repo.create(&BroadcastAlertDbModel::targeted("t-1", "teacher_password_expired", "yours"))
            .await
            .unwrap();
        repo.create(&BroadcastAlertDbModel::targeted("t-2", "system_error", "theirs"))
            .await
            .unwrap();

        let rows = repo
            .list("t-1", &cats(&["system_error"]), &SourceFilter::new())
            .await
            .unwrap();
        let titles: Vec<_> = rows.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(rows.len(), 2);
        assert!(titles.contains(&"db down"));
        assert!(titles.contains(&"yours"));
    }

    #[tokio::test]
    async fn test_category_match_ignores_case() {
        let repo = repo().await;
        repo.create(&BroadcastAlertDbModel::broadcast(" System_Error ", "legacy"))
            .await
            .unwrap();
        let rows = repo
            .list("a-1", &cats(&["system_error"]), &SourceFilter::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_outside_scope_are_noops() {
        let repo = repo().await;
        let id = repo
            .create(&BroadcastAlertDbModel::broadcast("teacher_password_expired", "x"))
            .await
            .unwrap();

        assert_eq!(repo.mark_read("a-1", &cats(&["system_error"]), &[id]).await.unwrap(), 0);
        assert_eq!(
            repo.delete("a-1", &cats(&["system_error"]), &DeleteScope::All)
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            repo.mark_read("s-1", &cats(&["teacher_password_expired"]), &[id])
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_mark_all_read_twice() {
        let repo = repo().await;
        repo.create(&BroadcastAlertDbModel::broadcast("system_error", "a"))
            .await
            .unwrap();
        repo.create(&BroadcastAlertDbModel::broadcast("system_error", "b"))
            .await
            .unwrap();

        let scope = cats(&["system_error"]);
        assert_eq!(repo.mark_all_read("a-1", &scope).await.unwrap(), 2);
        assert_eq!(repo.mark_all_read("a-1", &scope).await.unwrap(), 0);
    }
}
