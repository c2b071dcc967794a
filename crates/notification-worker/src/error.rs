//! 工作者错误类型
//!
//! 区分发送失败与关闭中断，便于消费管线决定标记失败还是交还消息。

use notifier_shared::error::NotifierError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("通知发送失败: 渠道={channel}, 原因={reason}")]
    SendFailed { channel: String, reason: String },

    #[error("收到关闭信号，处理中断")]
    ShuttingDown,

    #[error(transparent)]
    Shared(#[from] NotifierError),
}

impl From<WorkerError> for NotifierError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Shared(inner) => inner,
            WorkerError::SendFailed { channel, reason } => {
                NotifierError::SendFailed { channel, reason }
            }
            WorkerError::ShuttingDown => NotifierError::Internal("处理被关闭信号中断".to_string()),
        }
    }
}
