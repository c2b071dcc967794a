//! 通知仓储
//!
//! 提供 notifications 表的数据访问。每个方法是一条独立语句，
//! 行内状态迁移依赖单行 UPDATE 的原子性，无需多行事务。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifier_shared::error::{NotifierError, Result};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use super::traits::NotificationStore;
use crate::models::{NewNotification, Notification, NotificationChangeSet, Status};

const SELECT_COLUMNS: &str = "id, recipient, channel, payload, scheduled_at, status, retry_count, created_at, updated_at";

/// 通知仓储
pub struct NotificationRepository {
    pool: PgPool,
    /// processing 状态超过该时长未更新视为卡死
    stuck_threshold: Duration,
}

impl NotificationRepository {
    pub fn new(pool: PgPool, stuck_threshold: Duration) -> Self {
        Self {
            pool,
            stuck_threshold,
        }
    }
}

#[async_trait]
impl NotificationStore for NotificationRepository {
    async fn create(&self, new: NewNotification) -> Result<Notification> {
        let sql = format!(
            r#"
            INSERT INTO notifications (recipient, channel, payload, scheduled_at, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {SELECT_COLUMNS}
            "#
        );

        let notification = sqlx::query_as::<_, Notification>(&sql)
            .bind(&new.recipient)
            .bind(new.channel)
            .bind(&new.payload)
            .bind(new.scheduled_at)
            .bind(new.status)
            .fetch_one(&self.pool)
            .await?;

        debug!(
            id = %notification.id,
            recipient = %notification.recipient,
            channel = %notification.channel,
            scheduled_at = %notification.scheduled_at,
            "通知已入库"
        );

        Ok(notification)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Notification> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM notifications
            WHERE id = $1
            "#
        );

        sqlx::query_as::<_, Notification>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| NotifierError::NotFound { id: id.to_string() })
    }

    async fn update(&self, id: Uuid, changes: &NotificationChangeSet) -> Result<()> {
        let sql = build_update_sql(changes)?;

        let mut query = sqlx::query(&sql);
        if let Some(status) = changes.status {
            query = query.bind(status);
        }
        if let Some(channel) = changes.channel {
            query = query.bind(channel);
        }
        if let Some(scheduled_at) = changes.scheduled_at {
            query = query.bind(scheduled_at);
        }
        if let Some(payload) = &changes.payload {
            query = query.bind(payload);
        }
        let result = query.bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            warn!(id = %id, "更新未命中任何行");
            return Err(NotifierError::NoRowAffected { id: id.to_string() });
        }

        Ok(())
    }

    async fn list_due_or_stuck(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>> {
        // 谓词必须显式加括号：到期未投递与卡死是两个独立条件的并集
        let mut sql = format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM notifications
            WHERE (status = $1 AND scheduled_at <= $2)
               OR (status = $3 AND updated_at < $4)
            ORDER BY scheduled_at ASC
            "#
        );
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let stale_before = cutoff
            - chrono::Duration::from_std(self.stuck_threshold)
                .unwrap_or_else(|_| chrono::Duration::minutes(10));

        let notifications = sqlx::query_as::<_, Notification>(&sql)
            .bind(Status::Pending)
            .bind(cutoff)
            .bind(Status::Processing)
            .bind(stale_before)
            .fetch_all(&self.pool)
            .await?;

        // 空结果是正常情况，交由调用方决定是否继续
        Ok(notifications)
    }

    async fn claim_pending(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(Status::Processing)
        .bind(id)
        .bind(Status::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn inc_retry(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET retry_count = retry_count + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(NotifierError::NoRowAffected { id: id.to_string() });
        }
        Ok(())
    }
}

/// 根据变更集构造 UPDATE 语句
///
/// 占位符编号与仓储方法里的绑定顺序一致：
/// status、channel、scheduled_at、payload，最后是 WHERE 的 id。
/// 任何更新都会顺带刷新 updated_at。
fn build_update_sql(changes: &NotificationChangeSet) -> Result<String> {
    if changes.is_empty() {
        return Err(NotifierError::EmptyChangeSet);
    }

    let mut sets = Vec::new();
    let mut idx = 1;

    if changes.status.is_some() {
        sets.push(format!("status = ${idx}"));
        idx += 1;
    }
    if changes.channel.is_some() {
        sets.push(format!("channel = ${idx}"));
        idx += 1;
    }
    if changes.scheduled_at.is_some() {
        sets.push(format!("scheduled_at = ${idx}"));
        idx += 1;
    }
    if changes.payload.is_some() {
        sets.push(format!("payload = ${idx}"));
        idx += 1;
    }
    if changes.retry_count_inc {
        sets.push("retry_count = retry_count + 1".to_string());
    }
    sets.push("updated_at = NOW()".to_string());

    Ok(format!(
        "UPDATE notifications SET {} WHERE id = ${idx}",
        sets.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_update_sql_status_only() {
        let changes = NotificationChangeSet::new().with_status(Status::Cancelled);
        let sql = build_update_sql(&changes).unwrap();
        assert_eq!(
            sql,
            "UPDATE notifications SET status = $1, updated_at = NOW() WHERE id = $2"
        );
    }

    #[test]
    fn test_build_update_sql_retry_inc_only() {
        let changes = NotificationChangeSet::new().with_retry_count_inc();
        let sql = build_update_sql(&changes).unwrap();
        assert_eq!(
            sql,
            "UPDATE notifications SET retry_count = retry_count + 1, updated_at = NOW() WHERE id = $1"
        );
    }

    #[test]
    fn test_build_update_sql_full_change_set() {
        let changes = NotificationChangeSet::new()
            .with_status(Status::Pending)
            .with_channel(crate::models::Channel::Email)
            .with_scheduled_at(Utc::now())
            .with_payload(serde_json::json!({"subject": "Hi"}))
            .with_retry_count_inc();
        let sql = build_update_sql(&changes).unwrap();
        assert_eq!(
            sql,
            "UPDATE notifications SET status = $1, channel = $2, scheduled_at = $3, \
             payload = $4, retry_count = retry_count + 1, updated_at = NOW() WHERE id = $5"
        );
    }

    #[test]
    fn test_build_update_sql_rejects_empty() {
        let err = build_update_sql(&NotificationChangeSet::new()).unwrap_err();
        assert!(matches!(err, NotifierError::EmptyChangeSet));
    }
}
