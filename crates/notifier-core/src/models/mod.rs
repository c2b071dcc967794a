//! 领域模型定义

mod enums;
mod notification;

pub use enums::{Channel, Status};
pub use notification::{
    CreateNotificationParams, Job, NewNotification, Notification, NotificationChangeSet,
};
