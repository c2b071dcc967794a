//! 业务服务层
//!
//! 状态机的唯一持有者：所有状态迁移都经过这里校验后落库。

mod notification_service;

pub use notification_service::{NotificationApi, NotificationService};
