//! 通知调度工作者服务
//!
//! 消费调度队列上的唤醒消息，回源查询通知状态，经领取闸门后
//! 按渠道分发给对应的发送器，并在有限重试内汇报投递结果。

pub mod consumer;
pub mod error;
pub mod sender;
