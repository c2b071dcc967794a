//! 仓储层
//!
//! 数据库是通知状态的权威来源；缓存与消息总线通过同级 trait 抽象，
//! 便于服务层依赖接口而非具体实现。

mod cache;
mod notification_repo;
mod traits;

pub use cache::{RedisNotificationCache, notification_key};
pub use notification_repo::NotificationRepository;
pub use traits::{DelayPublisher, NotificationCache, NotificationStore};

#[cfg(test)]
pub use traits::{MockDelayPublisher, MockNotificationCache, MockNotificationStore};
