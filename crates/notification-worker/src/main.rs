//! 通知调度工作者服务
//!
//! 组合根：装配数据库、缓存、消息总线、通知服务、渠道发送器、
//! 恢复任务与消费者池，并处理优雅关闭。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use notification_worker::consumer::DispatchWorker;
use notification_worker::sender::{ChannelSender, EmailSmtpSender, SenderMap, TelegramSender};
use notifier_core::models::Channel;
use notifier_core::recovery::RecoverySweeper;
use notifier_core::repository::{NotificationRepository, RedisNotificationCache};
use notifier_core::service::NotificationService;
use notifier_core::AmqpDelayPublisher;
use notifier_shared::amqp::{AmqpClient, DispatchConsumer, MessageHandler};
use notifier_shared::cache::Cache;
use notifier_shared::config::AppConfig;
use notifier_shared::database::Database;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load("notification-worker")?;

    notifier_shared::observability::init(&config.observability)?;

    info!(environment = %config.environment, "Starting notification-worker...");

    // 基础设施连接
    let database = Database::connect(&config.database).await?;
    database.run_migrations().await?;

    let cache = Cache::new(&config.redis)?;
    cache.health_check().await?;

    let amqp = AmqpClient::connect(&config.amqp).await?;
    amqp.declare_topology().await?;

    // 领域组件装配
    let store = Arc::new(NotificationRepository::new(
        database.pool().clone(),
        Duration::from_secs(config.recovery.stuck_threshold_minutes * 60),
    ));
    let publisher = Arc::new(AmqpDelayPublisher::new(
        amqp.create_publisher().await?,
        config.amqp.publish_retry.policy(),
    ));
    let notification_cache = Arc::new(RedisNotificationCache::new(cache));

    let service = Arc::new(NotificationService::new(
        store.clone(),
        publisher.clone(),
        notification_cache,
        config.cache_ttl(),
    ));

    // 注册所有渠道发送器，每个渠道独立实现 ChannelSender trait
    let senders: SenderMap = HashMap::from([
        (
            Channel::Email,
            Arc::new(EmailSmtpSender::new(&config.email)?) as Arc<dyn ChannelSender>,
        ),
        (
            Channel::Telegram,
            Arc::new(TelegramSender) as Arc<dyn ChannelSender>,
        ),
    ]);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = Arc::new(DispatchWorker::new(
        service,
        senders,
        config.worker.send_retry.policy(),
        shutdown_rx.clone(),
    ));

    // 恢复任务在后台周期性补扫
    let recovery = RecoverySweeper::new(store, publisher, &config.recovery);
    let recovery_handle = tokio::spawn(recovery.run(shutdown_rx.clone()));

    let shutdown_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("收到关闭信号，开始优雅关闭...");
        let _ = shutdown_tx.send(true);
    });

    let consumer = DispatchConsumer::new(config.worker.workers, config.worker.prefetch);
    consumer
        .start(&amqp, shutdown_rx, worker as Arc<dyn MessageHandler>)
        .await?;

    let _ = recovery_handle.await;
    let _ = shutdown_handle.await;

    amqp.close().await;
    database.close().await;

    info!("notification-worker 已关闭");
    Ok(())
}

/// 监听操作系统关闭信号
///
/// 同时监听 SIGINT（Ctrl+C）和 SIGTERM（容器编排发送），
/// 任一信号到达即触发优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 信号失败");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
