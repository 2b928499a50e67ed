use std::sync::Arc;

use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};

use super::{USER_CACHE_TTL, UserCache, keys};
use crate::error::CacheError;
use crate::routes::user::model::User;

/// Redis 用户缓存，值为 JSON 序列化的用户快照
pub struct RedisUserCache {
    redis: Arc<RedisClient>,
}

impl RedisUserCache {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl UserCache for RedisUserCache {
    async fn get(&self, user_id: i64) -> Result<Option<User>, CacheError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let key = keys::user_info_key(user_id);
        let result: Option<String> = conn.get(key).await?;

        match result {
            Some(json) => {
                let user = serde_json::from_str(&json)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, user: &User) -> Result<(), CacheError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let key = keys::user_info_key(user.id);
        let json = serde_json::to_string(user)?;

        let _: () = conn.set_ex(key, json, USER_CACHE_TTL.as_secs()).await?;

        Ok(())
    }
}
