//! 延迟通知核心服务
//!
//! 实现通知的生命周期状态机与延迟投递编排：
//!
//! - **创建**：校验参数、落库、写穿缓存、向消息总线投递带 TTL 的唤醒消息
//! - **查询**：缓存优先的读路径，数据库兜底
//! - **状态迁移**：取消、标记失败、标记已发送，全部经由单一状态机校验
//! - **恢复**：周期扫描到期未投递与卡死的通知并重新入队
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `repository`: 数据库仓储层与缓存抽象
//! - `service`: 业务服务层（状态机的唯一持有者）
//! - `bus`: 延迟消息发布者
//! - `recovery`: 周期恢复任务

pub mod bus;
pub mod models;
pub mod recovery;
pub mod repository;
pub mod service;

pub use bus::AmqpDelayPublisher;
pub use models::*;
pub use recovery::RecoverySweeper;
pub use repository::{
    DelayPublisher, NotificationCache, NotificationRepository, NotificationStore,
    RedisNotificationCache, notification_key,
};
pub use service::{NotificationApi, NotificationService};
