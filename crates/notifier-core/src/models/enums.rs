//! 通知状态与渠道枚举
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化。
//! 合法值集合是封闭的：字符串边界（HTTP 入参、配置）通过 `FromStr`
//! 解析，集合之外的标签在解析时即被拒绝。

use std::fmt;
use std::str::FromStr;

use notifier_shared::error::NotifierError;
use serde::{Deserialize, Serialize};

/// 通知生命周期状态
///
/// 允许的迁移关系集中在 `can_transition_to`，服务层是唯一的状态变更方。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "notification_status", rename_all = "lowercase")]
pub enum Status {
    /// 等待计划时间到达
    Pending,
    /// 已被领取，投递进行中
    Processing,
    /// 投递成功（终态）
    Sent,
    /// 重试耗尽或不可重试错误（终态）
    Failed,
    /// 在投递前被用户取消（终态）
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }

    /// 状态机迁移表
    ///
    /// - pending -> processing（被 Worker 领取）
    /// - pending -> cancelled（用户取消）
    /// - processing -> sent / failed（投递结果）
    /// - processing -> pending（创建时投递失败的回滚，等待恢复任务）
    ///
    /// 终态不允许任何出边。
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Sent)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Pending)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = NotifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(NotifierError::InvalidStatus(other.to_string())),
        }
    }
}

/// 通知投递渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Channel {
    Email,
    Telegram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Telegram => "telegram",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = NotifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "telegram" => Ok(Self::Telegram),
            other => Err(NotifierError::InvalidChannel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&Status::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(
            serde_json::from_str::<Status>("\"cancelled\"").unwrap(),
            Status::Cancelled
        );
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!("email".parse::<Channel>().unwrap(), Channel::Email);
        assert_eq!("telegram".parse::<Channel>().unwrap(), Channel::Telegram);

        // 集合之外的渠道在解析边界即被拒绝
        let err = "sms".parse::<Channel>().unwrap_err();
        assert!(matches!(err, NotifierError::InvalidChannel(ref c) if c == "sms"));
    }

    #[test]
    fn test_status_parse_invalid() {
        let err = "done".parse::<Status>().unwrap_err();
        assert!(matches!(err, NotifierError::InvalidStatus(ref s) if s == "done"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(Status::Sent.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(Status::Cancelled.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Processing.is_terminal());
    }

    #[test]
    fn test_transition_table() {
        // 允许的迁移
        assert!(Status::Pending.can_transition_to(Status::Processing));
        assert!(Status::Pending.can_transition_to(Status::Cancelled));
        assert!(Status::Processing.can_transition_to(Status::Sent));
        assert!(Status::Processing.can_transition_to(Status::Failed));
        assert!(Status::Processing.can_transition_to(Status::Pending));

        // 其余全部拒绝
        let all = [
            Status::Pending,
            Status::Processing,
            Status::Sent,
            Status::Failed,
            Status::Cancelled,
        ];
        let allowed = [
            (Status::Pending, Status::Processing),
            (Status::Pending, Status::Cancelled),
            (Status::Processing, Status::Sent),
            (Status::Processing, Status::Failed),
            (Status::Processing, Status::Pending),
        ];
        for from in all {
            for to in all {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "迁移 {from} -> {to} 的判定不符合预期"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_transitions() {
        let all = [
            Status::Pending,
            Status::Processing,
            Status::Sent,
            Status::Failed,
            Status::Cancelled,
        ];
        for terminal in [Status::Sent, Status::Failed, Status::Cancelled] {
            for to in all {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }
}
