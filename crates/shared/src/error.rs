//! 统一错误处理模块
//!
//! 定义系统中所有共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 上层按 `is_retryable` 区分瞬时故障与业务错误。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum NotifierError {
    // ==================== 后端基础设施错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("AMQP 错误: {0}")]
    Amqp(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 记录定位错误 ====================
    #[error("通知未找到: id={id}")]
    NotFound { id: String },

    #[error("更新未命中任何行: id={id}")]
    NoRowAffected { id: String },

    // ==================== 参数验证错误 ====================
    #[error("无效的通知渠道: {0}")]
    InvalidChannel(String),

    #[error("无效的通知状态: {0}")]
    InvalidStatus(String),

    #[error("收件人为空")]
    EmptyRecipient,

    #[error("更新内容为空")]
    EmptyChangeSet,

    // ==================== 状态机错误 ====================
    #[error("不允许的状态迁移: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // ==================== 发送错误 ====================
    #[error("通知发送失败: 渠道={channel}, 原因={reason}")]
    SendFailed { channel: String, reason: String },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, NotifierError>;

impl NotifierError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Amqp(_) => "AMQP_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NoRowAffected { .. } => "NO_ROW_AFFECTED",
            Self::InvalidChannel(_) => "INVALID_CHANNEL",
            Self::InvalidStatus(_) => "INVALID_STATUS",
            Self::EmptyRecipient => "EMPTY_RECIPIENT",
            Self::EmptyChangeSet => "EMPTY_CHANGE_SET",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::SendFailed { .. } => "SEND_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 基础设施抖动与发送失败允许重试，验证与前置条件错误直接向上返回。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Redis(_) | Self::Amqp(_) | Self::SendFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = NotifierError::NotFound {
            id: "0192-abc".to_string(),
        };
        assert_eq!(err.code(), "NOT_FOUND");

        let err = NotifierError::InvalidTransition {
            from: "sent".to_string(),
            to: "pending".to_string(),
        };
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn test_is_retryable() {
        let db_err = NotifierError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        let amqp_err = NotifierError::Amqp("connection refused".to_string());
        assert!(amqp_err.is_retryable());

        let send_err = NotifierError::SendFailed {
            channel: "email".to_string(),
            reason: "smtp timeout".to_string(),
        };
        assert!(send_err.is_retryable());

        assert!(!NotifierError::EmptyRecipient.is_retryable());
        assert!(
            !NotifierError::InvalidTransition {
                from: "cancelled".to_string(),
                to: "cancelled".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_display() {
        let err = NotifierError::SendFailed {
            channel: "email".to_string(),
            reason: "连接被拒绝".to_string(),
        };
        assert_eq!(err.to_string(), "通知发送失败: 渠道=email, 原因=连接被拒绝");
    }
}
