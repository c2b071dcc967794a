//! AMQP 消息总线封装
//!
//! 将 lapin 的底层 API 封装为业务友好的客户端、延迟发布者与消费者抽象，
//! 统一拓扑声明、确认语义和优雅关闭，避免各服务重复编写样板代码。
//!
//! 延迟投递依赖 broker 原生能力组合实现：为每条消息声明一个专属队列，
//! 设置消息级 TTL 与队列级死信路由。消息过期后被死信机制转发到共享的
//! 调度队列，消费者只需要盯住调度队列即可。

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::AmqpConfig;
use crate::error::{NotifierError, Result};

// ---------------------------------------------------------------------------
// AmqpClient
// ---------------------------------------------------------------------------

/// AMQP 连接客户端
///
/// 持有单个长连接，发布者与每个消费者任务各自从它派生独立 channel。
pub struct AmqpClient {
    connection: Connection,
    config: AmqpConfig,
}

impl AmqpClient {
    /// 建立连接
    pub async fn connect(config: &AmqpConfig) -> Result<Self> {
        let options =
            ConnectionProperties::default().with_connection_name(config.connection_name.clone().into());

        let connection = Connection::connect(&config.url, options)
            .await
            .map_err(|e| NotifierError::Amqp(format!("连接 broker 失败: {e}")))?;

        info!(url = %config.url, connection_name = %config.connection_name, "AMQP 连接已建立");

        Ok(Self {
            connection,
            config: config.clone(),
        })
    }

    /// 声明共享拓扑
    ///
    /// 交换机、调度队列以及承接被拒消息的死信队列都在这里声明，
    /// 保证发布者与消费者看到一致的拓扑。
    pub async fn declare_topology(&self) -> Result<()> {
        let channel = self.create_channel().await?;
        let exchange = &self.config.exchange;
        let dispatch_queue = &self.config.dispatch_queue;
        let dlq_name = format!("{dispatch_queue}.dlq");

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| NotifierError::Amqp(format!("声明交换机失败: {e}")))?;

        // 调度队列：消费失败被拒的消息转入 <queue>.dlq
        let mut dispatch_args = FieldTable::default();
        dispatch_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(exchange.as_str().into()),
        );
        dispatch_args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(dlq_name.as_str().into()),
        );

        channel
            .queue_declare(
                dispatch_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                dispatch_args,
            )
            .await
            .map_err(|e| NotifierError::Amqp(format!("声明调度队列失败: {e}")))?;

        channel
            .queue_bind(
                dispatch_queue,
                exchange,
                dispatch_queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| NotifierError::Amqp(format!("绑定调度队列失败: {e}")))?;

        channel
            .queue_declare(
                &dlq_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| NotifierError::Amqp(format!("声明死信队列失败: {e}")))?;

        channel
            .queue_bind(
                &dlq_name,
                exchange,
                &dlq_name,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| NotifierError::Amqp(format!("绑定死信队列失败: {e}")))?;

        info!(exchange, dispatch_queue, "AMQP 拓扑已声明");
        Ok(())
    }

    /// 创建延迟发布者
    ///
    /// 发布者 channel 开启 confirm 模式，publish 在 broker 确认后才返回。
    pub async fn create_publisher(&self) -> Result<AmqpPublisher> {
        let channel = self.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| NotifierError::Amqp(format!("开启 confirm 模式失败: {e}")))?;

        Ok(AmqpPublisher {
            channel,
            exchange: self.config.exchange.clone(),
            dispatch_queue: self.config.dispatch_queue.clone(),
            expires_slack: Duration::from_secs(self.config.expires_slack_seconds),
        })
    }

    async fn create_channel(&self) -> Result<Channel> {
        self.connection
            .create_channel()
            .await
            .map_err(|e| NotifierError::Amqp(format!("创建 channel 失败: {e}")))
    }

    /// 调度队列名称
    pub fn dispatch_queue(&self) -> &str {
        &self.config.dispatch_queue
    }

    /// 关闭连接
    pub async fn close(&self) {
        if let Err(e) = self.connection.close(0, "shutdown").await {
            warn!(error = %e, "关闭 AMQP 连接出错");
        }
    }
}

// ---------------------------------------------------------------------------
// AmqpPublisher
// ---------------------------------------------------------------------------

/// 延迟消息发布者
///
/// 每次发布声明一个带死信路由的专属队列并投入单条带 TTL 的持久化消息。
#[derive(Clone)]
pub struct AmqpPublisher {
    channel: Channel,
    exchange: String,
    dispatch_queue: String,
    expires_slack: Duration,
}

impl AmqpPublisher {
    /// 发布一条延迟消息
    ///
    /// `queue_name` 为专属延迟队列名，`routing_key` 为该队列在共享交换机上
    /// 的绑定键。消息在 `ttl` 后过期并被死信转发到调度队列；队列自身在
    /// `ttl + slack` 后被 broker 回收。
    pub async fn publish_delayed(
        &self,
        queue_name: &str,
        routing_key: &str,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<()> {
        let args = delay_queue_args(&self.exchange, &self.dispatch_queue, ttl + self.expires_slack);

        self.channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| NotifierError::Amqp(format!("声明延迟队列失败: {e}")))?;

        self.channel
            .queue_bind(
                queue_name,
                &self.exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| NotifierError::Amqp(format!("绑定延迟队列失败: {e}")))?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_expiration(ttl.as_millis().to_string().into());

        let confirmation = self
            .channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| NotifierError::Amqp(format!("发布消息失败: {e}")))?
            .await
            .map_err(|e| NotifierError::Amqp(format!("等待 broker 确认失败: {e}")))?;

        if let Confirmation::Nack(_) = confirmation {
            return Err(NotifierError::Amqp("broker 拒绝了消息".to_string()));
        }

        debug!(
            queue = queue_name,
            ttl_ms = ttl.as_millis() as u64,
            "延迟消息已发布并确认"
        );
        Ok(())
    }
}

/// 构造延迟队列的声明参数
///
/// 过期消息经共享交换机按调度队列的绑定键转发；队列在 `expires` 后回收。
fn delay_queue_args(exchange: &str, dispatch_queue: &str, expires: Duration) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(exchange.into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(dispatch_queue.into()),
    );
    args.insert(
        "x-expires".into(),
        AMQPValue::LongLongInt(expires.as_millis() as i64),
    );
    args
}

// ---------------------------------------------------------------------------
// DispatchConsumer
// ---------------------------------------------------------------------------

/// 调度消息处理回调
///
/// 返回 `Ok` 确认消息；返回 `Err` 以 requeue=false 否认，
/// 由死信路由接手，避免坏消息在队列里无限打转。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<()>;
}

/// 调度队列消费者池
///
/// 启动固定数量的消费任务，每个任务持有独立 channel 并以 prefetch
/// 限制在途消息数。基于 watch channel 的关闭信号保证正在处理的消息
/// 自然完成后退出。
pub struct DispatchConsumer {
    workers: usize,
    prefetch: u16,
}

impl DispatchConsumer {
    pub fn new(workers: usize, prefetch: u16) -> Self {
        Self {
            workers: workers.max(1),
            prefetch: prefetch.max(1),
        }
    }

    /// 启动消费循环，直到收到关闭信号
    pub async fn start(
        &self,
        client: &AmqpClient,
        shutdown: watch::Receiver<bool>,
        handler: std::sync::Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let queue = client.dispatch_queue().to_string();
        let mut handles = Vec::with_capacity(self.workers);

        for worker_id in 0..self.workers {
            let channel = client.create_channel().await?;
            channel
                .basic_qos(self.prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| NotifierError::Amqp(format!("设置 prefetch 失败: {e}")))?;

            let consumer_tag = format!("{queue}-worker-{worker_id}");
            let consumer = channel
                .basic_consume(
                    &queue,
                    &consumer_tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| NotifierError::Amqp(format!("订阅调度队列失败: {e}")))?;

            let handler = handler.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(consume_loop(
                worker_id, consumer, shutdown, handler,
            )));
        }

        info!(
            queue,
            workers = self.workers,
            prefetch = self.prefetch,
            "调度消费者池已启动"
        );

        for handle in handles {
            let _ = handle.await;
        }

        info!("调度消费者池已停止");
        Ok(())
    }
}

/// 单个消费任务的主循环
async fn consume_loop(
    worker_id: usize,
    mut consumer: lapin::Consumer,
    mut shutdown: watch::Receiver<bool>,
    handler: std::sync::Arc<dyn MessageHandler>,
) {
    debug!(worker_id, "消费任务已启动");

    loop {
        tokio::select! {
            // 偏向关闭信号，保证收到关闭时能尽快退出
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(worker_id, "收到关闭信号，消费任务退出");
                    break;
                }
            }

            delivery = consumer.next() => {
                let Some(delivery) = delivery else {
                    warn!(worker_id, "消息流意外结束");
                    break;
                };

                match delivery {
                    Ok(delivery) => {
                        match handler.handle(&delivery.data).await {
                            Ok(()) => {
                                if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                                    error!(worker_id, error = %e, "确认消息失败");
                                }
                            }
                            Err(e) => {
                                error!(worker_id, error = %e, "处理调度消息失败，转入死信");
                                let nack = BasicNackOptions {
                                    requeue: false,
                                    ..Default::default()
                                };
                                if let Err(nack_err) = delivery.acker.nack(nack).await {
                                    error!(worker_id, error = %nack_err, "否认消息失败");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!(worker_id, error = %e, "接收调度消息出错");
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;

    #[test]
    fn test_delay_queue_args() {
        let args = delay_queue_args("DelayedNotifier", "notification", Duration::from_secs(62));
        let inner = args.inner();

        assert_eq!(
            inner.get(&ShortString::from("x-dead-letter-exchange")),
            Some(&AMQPValue::LongString("DelayedNotifier".into()))
        );
        assert_eq!(
            inner.get(&ShortString::from("x-dead-letter-routing-key")),
            Some(&AMQPValue::LongString("notification".into()))
        );
        assert_eq!(
            inner.get(&ShortString::from("x-expires")),
            Some(&AMQPValue::LongLongInt(62_000))
        );
    }

    #[test]
    fn test_consumer_pool_minimums() {
        // 非法的并发与 prefetch 配置回落到 1
        let consumer = DispatchConsumer::new(0, 0);
        assert_eq!(consumer.workers, 1);
        assert_eq!(consumer.prefetch, 1);
    }
}
