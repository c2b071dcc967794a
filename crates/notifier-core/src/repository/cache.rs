//! 通知缓存
//!
//! Redis 实现的读加速层。缓存只服务读路径，任何状态迁移的前置判断
//! 都必须回源数据库。

use std::time::Duration;

use async_trait::async_trait;
use notifier_shared::cache::Cache;
use notifier_shared::error::Result;
use uuid::Uuid;

use super::traits::NotificationCache;

/// 通知缓存键
pub fn notification_key(id: &Uuid) -> String {
    format!("notification:{id}")
}

/// Redis 通知缓存
#[derive(Clone)]
pub struct RedisNotificationCache {
    cache: Cache,
}

impl RedisNotificationCache {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl NotificationCache for RedisNotificationCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.cache.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.cache.set(key, value, ttl).await
    }
}
