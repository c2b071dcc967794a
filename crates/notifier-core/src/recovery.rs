//! 恢复任务
//!
//! 以固定间隔扫描数据库，重新入队两类通知：
//! 1. pending 且计划时间已到（创建时投递失败或消息丢失）
//! 2. processing 且长时间未更新（Worker 崩溃导致的卡死行）
//!
//! 只做重新投递，不改状态：pending 行由 Worker 的领取闸门保证幂等，
//! 卡死的 processing 行重新走发送路径。投递失败的行保持原样，
//! 下个周期再试。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notifier_shared::config::RecoveryConfig;
use notifier_shared::error::Result;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::repository::{DelayPublisher, NotificationStore};

/// 恢复任务
pub struct RecoverySweeper<S, P>
where
    S: NotificationStore,
    P: DelayPublisher,
{
    store: Arc<S>,
    publisher: Arc<P>,
    interval: Duration,
    batch_limit: i64,
    republish_ttl: Duration,
}

impl<S, P> RecoverySweeper<S, P>
where
    S: NotificationStore,
    P: DelayPublisher,
{
    pub fn new(store: Arc<S>, publisher: Arc<P>, config: &RecoveryConfig) -> Self {
        Self {
            store,
            publisher,
            interval: Duration::from_secs(config.interval_seconds),
            batch_limit: config.batch_limit,
            republish_ttl: Duration::from_secs(config.republish_ttl_seconds),
        }
    }

    /// 主循环：周期执行扫描直到收到关闭信号
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_limit = self.batch_limit,
            "恢复任务已启动"
        );

        let mut ticker = tokio::time::interval(self.interval);
        // 首个 tick 立即返回，进程重启后马上补扫一轮

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，恢复任务退出");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(0) => debug!("本轮扫描没有需要恢复的通知"),
                        Ok(count) => info!(count, "本轮扫描重新入队完成"),
                        Err(e) => error!(error = %e, "恢复扫描出错，下个周期重试"),
                    }
                }
            }
        }
    }

    /// 执行一轮扫描，返回重新入队的数量
    pub async fn sweep(&self) -> Result<usize> {
        let due = self
            .store
            .list_due_or_stuck(Utc::now(), self.batch_limit, 0)
            .await?;

        if due.is_empty() {
            return Ok(0);
        }

        let mut republished = 0;
        for n in &due {
            match self
                .publisher
                .publish_with_delay(n.id, self.republish_ttl)
                .await
            {
                Ok(()) => {
                    debug!(id = %n.id, status = %n.status, "通知已重新入队");
                    republished += 1;
                }
                // 行保持原样，下个周期会再次被扫到
                Err(e) => warn!(id = %n.id, error = %e, "重新入队失败，留待下轮"),
            }
        }

        Ok(republished)
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, Notification, Status};
    use crate::repository::{MockDelayPublisher, MockNotificationStore};
    use notifier_shared::error::NotifierError;
    use uuid::Uuid;

    fn make_notification(status: Status) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient: "a@b.c".to_string(),
            channel: Channel::Email,
            payload: serde_json::json!({}),
            scheduled_at: Utc::now() - chrono::Duration::minutes(20),
            status,
            retry_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now() - chrono::Duration::minutes(20),
        }
    }

    fn sweeper(
        store: MockNotificationStore,
        publisher: MockDelayPublisher,
    ) -> RecoverySweeper<MockNotificationStore, MockDelayPublisher> {
        RecoverySweeper::new(
            Arc::new(store),
            Arc::new(publisher),
            &RecoveryConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_sweep_republishes_due_and_stuck() {
        let due = make_notification(Status::Pending);
        let stuck = make_notification(Status::Processing);
        let rows = vec![due.clone(), stuck.clone()];

        let mut store = MockNotificationStore::new();
        store
            .expect_list_due_or_stuck()
            .returning(move |_, _, _| Ok(rows.clone()));
        // 不设置 update 期望：恢复路径绝不改状态

        let mut publisher = MockDelayPublisher::new();
        publisher
            .expect_publish_with_delay()
            .withf(|_, ttl| *ttl == Duration::from_secs(2))
            .times(2)
            .returning(|_, _| Ok(()));

        let count = sweeper(store, publisher).sweep().await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_sweep_empty_is_ok() {
        let mut store = MockNotificationStore::new();
        store
            .expect_list_due_or_stuck()
            .returning(|_, _, _| Ok(Vec::new()));

        let count = sweeper(store, MockDelayPublisher::new())
            .sweep()
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_sweep_publish_failure_leaves_row_untouched() {
        let n = make_notification(Status::Pending);
        let rows = vec![n.clone()];

        let mut store = MockNotificationStore::new();
        store
            .expect_list_due_or_stuck()
            .returning(move |_, _, _| Ok(rows.clone()));

        let mut publisher = MockDelayPublisher::new();
        publisher
            .expect_publish_with_delay()
            .returning(|_, _| Err(NotifierError::Amqp("broker 不可达".to_string())));

        // 投递失败不是扫描错误，行保持原样等待下轮
        let count = sweeper(store, publisher).sweep().await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_sweep_partial_failure_continues() {
        let first = make_notification(Status::Pending);
        let second = make_notification(Status::Pending);
        let failing_id = first.id;
        let rows = vec![first, second];

        let mut store = MockNotificationStore::new();
        store
            .expect_list_due_or_stuck()
            .returning(move |_, _, _| Ok(rows.clone()));

        let mut publisher = MockDelayPublisher::new();
        publisher
            .expect_publish_with_delay()
            .times(2)
            .returning(move |id, _| {
                if id == failing_id {
                    Err(NotifierError::Amqp("单条投递失败".to_string()))
                } else {
                    Ok(())
                }
            });

        let count = sweeper(store, publisher).sweep().await.unwrap();
        assert_eq!(count, 1);
    }
}
