//! SMTP 邮件发送器
//!
//! 基于 lettre 的异步 SMTP 传输，连接由传输层内部池化复用。
//! 凭据为空时跳过认证，兼容 MailHog 等无认证的测试服务器。

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use notifier_core::models::{Channel, Notification};
use notifier_shared::config::EmailConfig;
use tracing::{debug, info};

use super::ChannelSender;
use crate::error::WorkerError;

/// SMTP 邮件发送器
pub struct EmailSmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    timeout: Duration,
}

impl EmailSmtpSender {
    pub fn new(config: &EmailConfig) -> Result<Self, WorkerError> {
        let from: Mailbox = config.from.parse().map_err(|e| WorkerError::SendFailed {
            channel: Channel::Email.to_string(),
            reason: format!("发件人地址无效: {e}"),
        })?;

        let mut builder = if config.use_tls {
            let tls = TlsParameters::new(config.host.clone()).map_err(|e| {
                WorkerError::SendFailed {
                    channel: Channel::Email.to_string(),
                    reason: format!("TLS 参数构造失败: {e}"),
                }
            })?;
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| WorkerError::SendFailed {
                    channel: Channel::Email.to_string(),
                    reason: format!("SMTP 传输构造失败: {e}"),
                })?
                .port(config.port)
                .tls(Tls::Required(tls))
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port)
        };

        // 凭据为空时跳过认证
        if !config.username.is_empty() || !config.password.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        info!(host = %config.host, port = config.port, use_tls = config.use_tls, "SMTP 发送器已初始化");

        Ok(Self {
            transport: builder.build(),
            from,
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }
}

#[async_trait]
impl ChannelSender for EmailSmtpSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, notification: &Notification) -> Result<(), WorkerError> {
        let to: Mailbox =
            notification
                .recipient
                .parse()
                .map_err(|e| WorkerError::SendFailed {
                    channel: Channel::Email.to_string(),
                    reason: format!("收件人地址无效: {e}"),
                })?;

        let subject = render_subject(&notification.payload);
        let body = render_body(&notification.payload);

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body)
            .map_err(|e| WorkerError::SendFailed {
                channel: Channel::Email.to_string(),
                reason: format!("构造邮件失败: {e}"),
            })?;

        debug!(
            id = %notification.id,
            recipient = %notification.recipient,
            "发送邮件"
        );

        match tokio::time::timeout(self.timeout, self.transport.send(message)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(WorkerError::SendFailed {
                channel: Channel::Email.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(WorkerError::SendFailed {
                channel: Channel::Email.to_string(),
                reason: format!("发送超时（{}s）", self.timeout.as_secs()),
            }),
        }
    }
}

/// 主题取自负载的 subject 字段，缺失时为空
fn render_subject(payload: &serde_json::Value) -> String {
    payload
        .get("subject")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// 正文取自负载的 body 字段
///
/// 缺失时把其余键值对按 `k=v` 拼接，字符串值不带引号。
fn render_body(payload: &serde_json::Value) -> String {
    if let Some(body) = payload.get("body").and_then(serde_json::Value::as_str) {
        return body.to_string();
    }

    match payload.as_object() {
        Some(map) => map
            .iter()
            .filter(|(k, _)| k.as_str() != "subject")
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        None => payload.to_string(),
    }
}
