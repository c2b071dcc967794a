//! 仓储 Trait 定义
//!
//! 定义存储、缓存与延迟发布接口，便于服务层依赖抽象而非具体实现，
//! 支持 mock 测试。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifier_shared::error::Result;
use uuid::Uuid;

use crate::models::{NewNotification, Notification, NotificationChangeSet};

/// 通知存储接口
///
/// 每个操作都是独立事务；`claim_pending` 是 pending -> processing
/// 迁移的线性化点，必须是单条原子语句。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// 插入新通知，返回数据库生成的完整行
    async fn create(&self, new: NewNotification) -> Result<Notification>;

    /// 按 id 查询，未找到返回 NotFound
    async fn get_by_id(&self, id: Uuid) -> Result<Notification>;

    /// 应用部分变更集，未命中任何行返回 NoRowAffected
    async fn update(&self, id: Uuid, changes: &NotificationChangeSet) -> Result<()>;

    /// 列出到期未投递（pending 且 scheduled_at <= cutoff）或卡死
    /// （processing 且长时间未更新）的通知，空结果是正常返回
    async fn list_due_or_stuck(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>>;

    /// 原子比较交换：仅当状态为 pending 时置为 processing，
    /// 返回调用方是否赢得了领取
    async fn claim_pending(&self, id: Uuid) -> Result<bool>;

    /// retry_count 原子加一
    async fn inc_retry(&self, id: Uuid) -> Result<()>;
}

/// 延迟消息发布接口
///
/// 投递一条在 ttl 后到达调度队列的唤醒消息。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DelayPublisher: Send + Sync {
    async fn publish_with_delay(&self, id: Uuid, ttl: Duration) -> Result<()>;
}

/// 通知缓存接口
///
/// 键不存在返回 `Ok(None)`；值是通知的 JSON 序列化字节。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
}
