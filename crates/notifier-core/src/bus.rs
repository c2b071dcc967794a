//! 延迟消息发布者
//!
//! 把领域层的"在 ttl 后唤醒某条通知"翻译成总线上的具体动作：
//! 为通知声明专属延迟队列 `queue:<id>` 并投入一条 Job 消息。
//! 发布本身按重试策略执行，吸收 broker 的瞬时抖动。

use std::time::Duration;

use async_trait::async_trait;
use notifier_shared::amqp::AmqpPublisher;
use notifier_shared::error::{NotifierError, Result};
use notifier_shared::retry::{RetryPolicy, retry_with_policy};
use uuid::Uuid;

use crate::models::Job;
use crate::repository::DelayPublisher;

/// 通知专属延迟队列名
pub fn delay_queue_name(id: &Uuid) -> String {
    format!("queue:{id}")
}

/// AMQP 延迟发布者
pub struct AmqpDelayPublisher {
    publisher: AmqpPublisher,
    retry: RetryPolicy,
}

impl AmqpDelayPublisher {
    pub fn new(publisher: AmqpPublisher, retry: RetryPolicy) -> Self {
        Self { publisher, retry }
    }
}

#[async_trait]
impl DelayPublisher for AmqpDelayPublisher {
    async fn publish_with_delay(&self, id: Uuid, ttl: Duration) -> Result<()> {
        let queue = delay_queue_name(&id);
        let routing_key = id.to_string();
        let payload = serde_json::to_vec(&Job {
            notification_id: id.to_string(),
        })?;

        retry_with_policy(
            &self.retry,
            "publish_with_delay",
            NotifierError::is_retryable,
            || {
                let publisher = self.publisher.clone();
                let queue = queue.clone();
                let routing_key = routing_key.clone();
                let payload = payload.clone();
                async move {
                    publisher
                        .publish_delayed(&queue, &routing_key, &payload, ttl)
                        .await
                }
            },
        )
        .await
    }
}
