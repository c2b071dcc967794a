//! Telegram 发送器占位实现
//!
//! 当前版本只记录日志并汇报成功，便于在未接入 Bot API 的环境里
//! 验证消费管线的完整性。接入真实 SDK 时只需实现同一 trait。

use async_trait::async_trait;
use notifier_core::models::{Channel, Notification};
use tracing::info;

use super::ChannelSender;
use crate::error::WorkerError;

/// Telegram 占位发送器
pub struct TelegramSender;

#[async_trait]
impl ChannelSender for TelegramSender {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn send(&self, notification: &Notification) -> Result<(), WorkerError> {
        info!(
            channel = "telegram",
            id = %notification.id,
            recipient = %notification.recipient,
            "模拟发送 Telegram 通知"
        );
        Ok(())
    }
}
