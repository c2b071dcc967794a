//! 调度消息消费管线
//!
//! 每条消息的处理流程：解码、回源查询、领取闸门、按渠道分发、
//! 有限重试、汇报结果。重复投递由领取闸门与终态检查吸收，
//! 无法解码的毒消息确认后丢弃，保证消费循环不被单条坏消息拖垮。

use std::sync::Arc;

use async_trait::async_trait;
use notifier_core::models::{Job, Notification, NotificationChangeSet, Status};
use notifier_core::service::NotificationApi;
use notifier_shared::amqp::MessageHandler;
use notifier_shared::error::NotifierError;
use notifier_shared::retry::{RetryPolicy, sleep_unless_cancelled};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::WorkerError;
use crate::sender::{ChannelSender, SenderMap};

/// 调度消息处理器
///
/// 同一实例被消费者池的所有任务共享，自身不含可变状态，
/// 并发安全性由存储层的原子领取保证。
pub struct DispatchWorker<S> {
    service: Arc<S>,
    senders: SenderMap,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl<S: NotificationApi> DispatchWorker<S> {
    pub fn new(
        service: Arc<S>,
        senders: SenderMap,
        retry: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            senders,
            retry,
            shutdown,
        }
    }

    /// 处理单条调度消息
    ///
    /// 返回 `Ok` 表示消息可以确认（包括毒消息丢弃与幂等跳过）；
    /// 返回 `Err` 表示基础设施故障或关闭中断，消息交还死信路由，
    /// 卡住的行最终由恢复任务重新入队。
    pub async fn process(&self, payload: &[u8]) -> Result<(), WorkerError> {
        let job: Job = match serde_json::from_slice(payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "无法解码调度消息，按毒消息丢弃");
                return Ok(());
            }
        };

        let id = match Uuid::parse_str(&job.notification_id) {
            Ok(id) => id,
            Err(e) => {
                warn!(raw = %job.notification_id, error = %e, "通知 id 无法解析，按毒消息丢弃");
                return Ok(());
            }
        };

        let mut n = match self.service.get_notification_by_id(id).await {
            Ok(n) => n,
            Err(NotifierError::NotFound { .. }) => {
                warn!(id = %id, "通知不存在，丢弃唤醒消息");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match n.status {
            Status::Cancelled => {
                debug!(id = %id, "通知已取消，确认后跳过");
                return Ok(());
            }
            Status::Sent | Status::Failed => {
                // 重复投递：工作已经完成
                debug!(id = %id, status = %n.status, "通知已处于终态，确认后跳过");
                return Ok(());
            }
            Status::Pending => {
                if !self.service.claim_pending(id).await? {
                    debug!(id = %id, "未赢得领取，确认后跳过");
                    return Ok(());
                }
                n.status = Status::Processing;
            }
            // 恢复任务重新入队的卡死行已经过了领取闸门，直接走发送路径
            Status::Processing => {}
        }

        let Some(sender) = self.senders.get(&n.channel) else {
            warn!(id = %id, channel = %n.channel, "该渠道未注册发送器，标记为失败");
            self.service.mark_failed(id).await?;
            return Ok(());
        };

        match self.send_with_retry(sender.as_ref(), &mut n).await {
            Ok(()) => {
                self.service
                    .update_notification(&mut n, NotificationChangeSet::new().with_status(Status::Sent))
                    .await?;
                info!(id = %id, channel = %n.channel, retry_count = n.retry_count, "通知投递成功");
                Ok(())
            }
            Err(WorkerError::ShuttingDown) => {
                // 不标记失败：进程即将退出，交还消息由恢复链路兜底
                warn!(id = %id, "发送在关闭过程中被中断");
                Err(WorkerError::ShuttingDown)
            }
            Err(e) => {
                error!(id = %id, channel = %n.channel, error = %e, "重试耗尽，标记为失败");
                self.service.mark_failed(id).await?;
                Ok(())
            }
        }
    }

    /// 按重试策略执行发送，每次失败后累加重试计数
    async fn send_with_retry(
        &self,
        sender: &dyn ChannelSender,
        n: &mut Notification,
    ) -> Result<(), WorkerError> {
        let mut shutdown = self.shutdown.clone();
        let mut attempt: u32 = 0;

        loop {
            match sender.send(n).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(id = %n.id, attempt, "重试后发送成功");
                    }
                    return Ok(());
                }
                Err(e) => {
                    if let Err(inc_err) = self.service.inc_retry(n).await {
                        warn!(id = %n.id, error = %inc_err, "累加重试计数失败");
                    }

                    if !self.retry.should_retry(attempt) {
                        return Err(e);
                    }

                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        id = %n.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "发送失败，退避后重试"
                    );

                    if !sleep_unless_cancelled(delay, &mut shutdown).await {
                        return Err(WorkerError::ShuttingDown);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<S: NotificationApi + 'static> MessageHandler for DispatchWorker<S> {
    async fn handle(&self, payload: &[u8]) -> notifier_shared::error::Result<()> {
        self.process(payload).await.map_err(NotifierError::from)
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
