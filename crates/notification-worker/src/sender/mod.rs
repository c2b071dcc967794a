//! 多渠道通知发送器
//!
//! 通过 `ChannelSender` trait 抽象发送行为，各渠道提供独立实现。
//! 发送器只负责"尝试投递并汇报成败"，重试与状态迁移由消费管线掌控。

mod email;
mod telegram;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use notifier_core::models::{Channel, Notification};

use crate::error::WorkerError;

pub use email::EmailSmtpSender;
pub use telegram::TelegramSender;

/// 通知发送器 trait，各渠道实现具体的投递逻辑
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// 该发送器支持的渠道
    fn channel(&self) -> Channel;

    /// 尝试一次投递，错误一律视为可重试
    async fn send(&self, notification: &Notification) -> Result<(), WorkerError>;
}

/// 渠道到发送器的注册表
pub type SenderMap = HashMap<Channel, Arc<dyn ChannelSender>>;
