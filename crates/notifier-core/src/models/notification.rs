//! 通知实体与变更集

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Channel, Status};

/// 通知实体
///
/// 与 notifications 表一一对应；JSON 序列化形式同时用作缓存条目。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient: String,
    pub channel: Channel,
    /// 渠道相关的任意键值负载，按原样存储为 jsonb
    pub payload: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
    pub status: Status,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 创建通知的外部入参
#[derive(Debug, Clone)]
pub struct CreateNotificationParams {
    pub recipient: String,
    pub channel: Channel,
    pub payload: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
}

/// 仓储层插入参数
///
/// 初始状态由服务层根据计划时间计算后传入。
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient: String,
    pub channel: Channel,
    pub status: Status,
    pub payload: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
}

/// 总线上承载的任务消息
///
/// 延迟队列里只放通知 id，消费时再回源查询最新状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub notification_id: String,
}

/// 部分更新变更集
///
/// 任意字段子集的组合；空变更集在服务层被拒绝。
#[derive(Debug, Clone, Default)]
pub struct NotificationChangeSet {
    pub status: Option<Status>,
    pub channel: Option<Channel>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub payload: Option<serde_json::Value>,
    /// 置位时 retry_count 原子加一
    pub retry_count_inc: bool,
}

impl NotificationChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_retry_count_inc(mut self) -> Self {
        self.retry_count_inc = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.channel.is_none()
            && self.scheduled_at.is_none()
            && self.payload.is_none()
            && !self.retry_count_inc
    }

    /// 将变更集套用到内存中的实体副本上，保持与数据库一致
    pub fn apply_to(&self, n: &mut Notification) {
        if let Some(status) = self.status {
            n.status = status;
        }
        if let Some(channel) = self.channel {
            n.channel = channel;
        }
        if let Some(scheduled_at) = self.scheduled_at {
            n.scheduled_at = scheduled_at;
        }
        if let Some(payload) = &self.payload {
            n.payload = payload.clone();
        }
        if self.retry_count_inc {
            n.retry_count += 1;
        }
        n.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_wire_format() {
        let job = Job {
            notification_id: "6b3f8a10-0000-0000-0000-000000000000".to_string(),
        };
        let json = serde_json::to_string(&job).unwrap();
        assert_eq!(
            json,
            r#"{"notificationId":"6b3f8a10-0000-0000-0000-000000000000"}"#
        );

        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.notification_id, job.notification_id);
    }

    #[test]
    fn test_change_set_is_empty() {
        assert!(NotificationChangeSet::new().is_empty());
        assert!(!NotificationChangeSet::new().with_retry_count_inc().is_empty());
        assert!(
            !NotificationChangeSet::new()
                .with_status(Status::Sent)
                .is_empty()
        );
    }

    #[test]
    fn test_change_set_apply_to() {
        let mut n = Notification {
            id: Uuid::new_v4(),
            recipient: "a@b.c".to_string(),
            channel: Channel::Email,
            payload: serde_json::json!({"subject": "Hi"}),
            scheduled_at: Utc::now(),
            status: Status::Processing,
            retry_count: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        NotificationChangeSet::new()
            .with_status(Status::Sent)
            .with_retry_count_inc()
            .apply_to(&mut n);

        assert_eq!(n.status, Status::Sent);
        assert_eq!(n.retry_count, 2);
    }

    #[test]
    fn test_notification_cache_round_trip() {
        let n = Notification {
            id: Uuid::new_v4(),
            recipient: "a@b.c".to_string(),
            channel: Channel::Telegram,
            payload: serde_json::json!({"body": "你好"}),
            scheduled_at: Utc::now(),
            status: Status::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let bytes = serde_json::to_vec(&n).unwrap();
        let parsed: Notification = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, n);

        // 缓存条目使用 camelCase 字段名
        let json = String::from_utf8(bytes).unwrap();
        assert!(json.contains("scheduledAt"));
        assert!(json.contains("retryCount"));
    }
}
