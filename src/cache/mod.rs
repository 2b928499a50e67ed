use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;
use crate::routes::user::model::User;

pub mod keys;
mod resolver;
pub mod users;

pub use resolver::{UserResolver, UserStore};
pub use users::RedisUserCache;

/// 用户缓存固定5分钟过期，过期后下一次解析会回源数据库
pub const USER_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// 用户缓存契约。`get` 返回 `Ok(None)` 表示未命中；传输或序列化失败必须返回错误
#[async_trait]
pub trait UserCache: Send + Sync {
    async fn get(&self, user_id: i64) -> Result<Option<User>, CacheError>;

    async fn set(&self, user: &User) -> Result<(), CacheError>;
}
