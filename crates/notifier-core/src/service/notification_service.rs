//! 通知服务
//!
//! 编排存储、缓存与延迟消息总线：创建时计算初始状态与唤醒 TTL，
//! 读取时缓存优先，状态迁移统一经过状态机校验。
//!
//! 缓存写入全部是尽力而为：写失败只记日志，不影响数据库事实。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use notifier_shared::error::{NotifierError, Result};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::models::{CreateNotificationParams, Notification, NotificationChangeSet, Status};
use crate::repository::{DelayPublisher, NotificationCache, NotificationStore, notification_key};

/// 计划时间的宽限窗口
///
/// 计划时间落在 now + 2s 之前的通知视为"立即投递"，以 processing
/// 状态入库并使用 2 秒的唤醒 TTL。
const SCHEDULE_GRACE_SECS: i64 = 2;

/// 通知服务接口
///
/// Worker 与上层门面依赖该抽象，具体实现由组合根注入，
/// 以此打破 Service 与 Worker 之间的环形依赖。
#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn create_notification(&self, params: CreateNotificationParams) -> Result<Notification>;
    async fn get_notification_by_id(&self, id: Uuid) -> Result<Notification>;
    async fn update_notification(
        &self,
        n: &mut Notification,
        changes: NotificationChangeSet,
    ) -> Result<()>;
    async fn cancel(&self, id: Uuid) -> Result<()>;
    async fn mark_failed(&self, id: Uuid) -> Result<()>;
    async fn inc_retry(&self, n: &mut Notification) -> Result<()>;
    async fn claim_pending(&self, id: Uuid) -> Result<bool>;
}

/// 通知服务实现
pub struct NotificationService<S, P, C>
where
    S: NotificationStore,
    P: DelayPublisher,
    C: NotificationCache,
{
    store: Arc<S>,
    publisher: Arc<P>,
    cache: Arc<C>,
    cache_ttl: Duration,
}

impl<S, P, C> NotificationService<S, P, C>
where
    S: NotificationStore,
    P: DelayPublisher,
    C: NotificationCache,
{
    pub fn new(store: Arc<S>, publisher: Arc<P>, cache: Arc<C>, cache_ttl: Duration) -> Self {
        Self {
            store,
            publisher,
            cache,
            cache_ttl,
        }
    }

    /// 写穿缓存，失败只记日志
    async fn write_through(&self, n: &Notification) {
        let key = notification_key(&n.id);
        match serde_json::to_vec(n) {
            Ok(bytes) => {
                if let Err(e) = self.cache.set(&key, &bytes, self.cache_ttl).await {
                    warn!(id = %n.id, error = %e, "写入缓存失败，忽略");
                }
            }
            Err(e) => warn!(id = %n.id, error = %e, "序列化缓存条目失败，忽略"),
        }
    }

    /// 校验前置状态后执行迁移
    async fn transition_status(&self, id: Uuid, allowed: Status, target: Status) -> Result<()> {
        let mut n = self.get_notification_by_id(id).await?;

        if n.status != allowed {
            warn!(
                id = %id,
                current = %n.status,
                target = %target,
                "当前状态不满足迁移前置条件"
            );
            return Err(NotifierError::InvalidTransition {
                from: n.status.to_string(),
                to: target.to_string(),
            });
        }

        self.update_notification(&mut n, NotificationChangeSet::new().with_status(target))
            .await
    }
}

#[async_trait]
impl<S, P, C> NotificationApi for NotificationService<S, P, C>
where
    S: NotificationStore,
    P: DelayPublisher,
    C: NotificationCache,
{
    async fn create_notification(&self, params: CreateNotificationParams) -> Result<Notification> {
        if params.recipient.is_empty() {
            warn!("创建通知被拒绝：收件人为空");
            return Err(NotifierError::EmptyRecipient);
        }

        let now_with_grace = Utc::now() + chrono::Duration::seconds(SCHEDULE_GRACE_SECS);
        let (status, ttl) = if params.scheduled_at < now_with_grace {
            (
                Status::Processing,
                Duration::from_secs(SCHEDULE_GRACE_SECS as u64),
            )
        } else {
            (
                Status::Pending,
                (params.scheduled_at - now_with_grace)
                    .to_std()
                    .unwrap_or_default(),
            )
        };

        let mut n = self
            .store
            .create(crate::models::NewNotification {
                recipient: params.recipient,
                channel: params.channel,
                status,
                payload: params.payload,
                scheduled_at: params.scheduled_at,
            })
            .await?;

        self.write_through(&n).await;

        debug!(id = %n.id, status = %n.status, ttl_secs = ttl.as_secs(), "通知已创建，投递唤醒消息");

        if let Err(e) = self.publisher.publish_with_delay(n.id, ttl).await {
            // 投递失败回滚为 pending，行仍可被恢复任务扫到并重新入队，
            // 调用方拿到的是一条排队等待的通知而不是错误
            error!(id = %n.id, error = %e, "唤醒消息投递失败，状态回滚为 pending");
            self.store
                .update(n.id, &NotificationChangeSet::new().with_status(Status::Pending))
                .await?;
            n.status = Status::Pending;
            self.write_through(&n).await;
        }

        Ok(n)
    }

    async fn get_notification_by_id(&self, id: Uuid) -> Result<Notification> {
        let key = notification_key(&id);

        if let Some(bytes) = self.cache.get(&key).await? {
            match serde_json::from_slice::<Notification>(&bytes) {
                Ok(n) => {
                    debug!(id = %id, "缓存命中");
                    return Ok(n);
                }
                // 损坏的缓存条目按未命中处理，回源数据库
                Err(e) => warn!(id = %id, error = %e, "缓存条目无法解析，按未命中处理"),
            }
        }

        debug!(id = %id, "缓存未命中，回源数据库");
        let n = self.store.get_by_id(id).await?;
        self.write_through(&n).await;
        Ok(n)
    }

    async fn update_notification(
        &self,
        n: &mut Notification,
        changes: NotificationChangeSet,
    ) -> Result<()> {
        if changes.is_empty() {
            return Err(NotifierError::EmptyChangeSet);
        }

        if let Some(target) = changes.status {
            if !n.status.can_transition_to(target) {
                warn!(id = %n.id, from = %n.status, to = %target, "状态迁移被状态机拒绝");
                return Err(NotifierError::InvalidTransition {
                    from: n.status.to_string(),
                    to: target.to_string(),
                });
            }
        }

        match self.store.update(n.id, &changes).await {
            Ok(()) => {}
            // 行已不存在时视为软失败：记录并返回成功，避免幂等重放被误判
            Err(NotifierError::NoRowAffected { id }) => {
                warn!(id = %id, "更新未命中任何行，按软失败处理");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        changes.apply_to(n);
        self.write_through(n).await;
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> Result<()> {
        self.transition_status(id, Status::Pending, Status::Cancelled)
            .await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<()> {
        self.transition_status(id, Status::Processing, Status::Failed)
            .await
    }

    async fn inc_retry(&self, n: &mut Notification) -> Result<()> {
        self.update_notification(n, NotificationChangeSet::new().with_retry_count_inc())
            .await
    }

    async fn claim_pending(&self, id: Uuid) -> Result<bool> {
        let claimed = self.store.claim_pending(id).await?;

        if claimed {
            // 领取成功后刷新缓存副本，读路径尽快看到 processing
            match self.store.get_by_id(id).await {
                Ok(fresh) => self.write_through(&fresh).await,
                Err(e) => warn!(id = %id, error = %e, "领取后回读失败，缓存暂不刷新"),
            }
        }

        Ok(claimed)
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
