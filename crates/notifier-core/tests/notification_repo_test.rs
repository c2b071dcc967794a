//! 通知仓储集成测试
//!
//! 使用真实 PostgreSQL 验证仓储层的 SQL 语义：原子领取、动态更新、
//! 到期与卡死行扫描。纯 mock 无法覆盖这些语句，因此需要集成测试。
//!
//! ## 运行方式
//!
//! ```bash
//! DATABASE_URL=postgres://... cargo test --test notification_repo_test -- --ignored
//! ```

use std::time::Duration;

use chrono::Utc;
use notifier_core::models::{Channel, NewNotification, NotificationChangeSet, Status};
use notifier_core::repository::{NotificationRepository, NotificationStore};
use notifier_shared::error::NotifierError;
use sqlx::PgPool;
use uuid::Uuid;

/// 从环境变量读取数据库 URL，未设置则 panic
fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests")
}

/// 建立连接池并确保迁移已执行
async fn setup_repo() -> NotificationRepository {
    let pool = PgPool::connect(&database_url())
        .await
        .expect("数据库连接失败");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("迁移执行失败");
    NotificationRepository::new(pool, Duration::from_secs(600))
}

fn make_new(status: Status, scheduled_offset_minutes: i64) -> NewNotification {
    NewNotification {
        recipient: "integration@example.com".to_string(),
        channel: Channel::Email,
        status,
        payload: serde_json::json!({"subject": "集成测试", "body": "hello"}),
        scheduled_at: Utc::now() + chrono::Duration::minutes(scheduled_offset_minutes),
    }
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_create_get_round_trip() {
    let repo = setup_repo().await;

    let created = repo.create(make_new(Status::Pending, 60)).await.unwrap();
    assert_eq!(created.status, Status::Pending);
    assert_eq!(created.retry_count, 0);

    let fetched = repo.get_by_id(created.id).await.unwrap();
    assert_eq!(fetched.recipient, created.recipient);
    assert_eq!(fetched.channel, created.channel);
    assert_eq!(fetched.payload, created.payload);
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_get_unknown_id_is_not_found() {
    let repo = setup_repo().await;

    let err = repo.get_by_id(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, NotifierError::NotFound { .. }));
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_claim_pending_is_atomic() {
    let repo = setup_repo().await;

    let created = repo.create(make_new(Status::Pending, -5)).await.unwrap();

    // 第一次领取成功，第二次必须失败
    assert!(repo.claim_pending(created.id).await.unwrap());
    assert!(!repo.claim_pending(created.id).await.unwrap());

    let fetched = repo.get_by_id(created.id).await.unwrap();
    assert_eq!(fetched.status, Status::Processing);
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_update_change_set_and_retry_inc() {
    let repo = setup_repo().await;

    let created = repo.create(make_new(Status::Processing, -5)).await.unwrap();

    repo.update(
        created.id,
        &NotificationChangeSet::new().with_status(Status::Sent),
    )
    .await
    .unwrap();

    repo.inc_retry(created.id).await.unwrap();

    let fetched = repo.get_by_id(created.id).await.unwrap();
    assert_eq!(fetched.status, Status::Sent);
    assert_eq!(fetched.retry_count, 1);
    assert!(fetched.updated_at > created.updated_at);
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_update_missing_row_is_no_row_affected() {
    let repo = setup_repo().await;

    let err = repo
        .update(
            Uuid::new_v4(),
            &NotificationChangeSet::new().with_status(Status::Cancelled),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, NotifierError::NoRowAffected { .. }));
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_list_due_or_stuck_filters() {
    let repo = setup_repo().await;

    // 到期的 pending 行应被扫到
    let due = repo.create(make_new(Status::Pending, -10)).await.unwrap();
    // 未到期的 pending 行不应被扫到
    let future = repo.create(make_new(Status::Pending, 60)).await.unwrap();
    // 刚领取的 processing 行（updated_at 新鲜）不应被扫到
    let fresh = repo
        .create(make_new(Status::Processing, -10))
        .await
        .unwrap();

    let rows = repo
        .list_due_or_stuck(Utc::now(), 1000, 0)
        .await
        .unwrap();
    let ids: Vec<Uuid> = rows.iter().map(|n| n.id).collect();

    assert!(ids.contains(&due.id));
    assert!(!ids.contains(&future.id));
    assert!(!ids.contains(&fresh.id));

    for row in &rows {
        assert!(matches!(row.status, Status::Pending | Status::Processing));
    }
}
