use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use super::UserCache;
use crate::error::{ResolveError, StoreError};
use crate::routes::user::model::User;

/// 持久存储契约，数据库永远是事实来源
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, user_id: i64) -> Result<User, StoreError>;
}

#[async_trait]
impl UserStore for PgPool {
    async fn get_by_id(&self, user_id: i64) -> Result<User, StoreError> {
        User::get_by_id(self, user_id).await
    }
}

/// 认证身份解析器。缓存未配置时直接回源；配置时按 cache-aside 模式工作：
/// 命中直接返回，未命中回源并写回缓存。缓存本身出错是硬失败，不能当作未命中
pub struct UserResolver {
    store: Arc<dyn UserStore>,
    cache: Option<Arc<dyn UserCache>>,
}

impl UserResolver {
    pub fn new(store: Arc<dyn UserStore>, cache: Option<Arc<dyn UserCache>>) -> Self {
        Self { store, cache }
    }

    pub async fn resolve(&self, user_id: i64) -> Result<User, ResolveError> {
        let Some(cache) = &self.cache else {
            return Ok(self.store.get_by_id(user_id).await?);
        };

        if let Some(user) = cache.get(user_id).await? {
            tracing::debug!("cache hit for user {}", user_id);
            return Ok(user);
        }

        tracing::debug!("cache miss for user {}", user_id);
        let user = self.store.get_by_id(user_id).await?;

        // 写回失败只记日志：调用方已经拿到了数据库里的有效数据
        if let Err(e) = cache.set(&user).await {
            tracing::warn!("failed to cache user {}: {}", user.id, e);
        }

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Mutex;

    use super::*;
    use crate::error::CacheError;

    fn sample_user(id: i64) -> User {
        User {
            id,
            username: format!("user{}", id),
            email: format!("user{}@example.com", id),
            password_hash: None,
            created_at: chrono::Utc::now(),
            is_active: true,
        }
    }

    struct StubStore {
        user: Option<User>,
        calls: AtomicUsize,
    }

    impl StubStore {
        fn with_user(user: User) -> Self {
            Self {
                user: Some(user),
                calls: AtomicUsize::new(0),
            }
        }

        fn empty() -> Self {
            Self {
                user: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UserStore for StubStore {
        async fn get_by_id(&self, _user_id: i64) -> Result<User, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.user.clone().ok_or(StoreError::NotFound)
        }
    }

    #[derive(Default)]
    struct StubCache {
        entries: Mutex<Vec<User>>,
        fail_get: bool,
        fail_set: bool,
        gets: AtomicUsize,
        sets: AtomicUsize,
    }

    impl StubCache {
        fn failing_get() -> Self {
            Self {
                fail_get: true,
                ..Default::default()
            }
        }

        fn failing_set() -> Self {
            Self {
                fail_set: true,
                ..Default::default()
            }
        }

        async fn preload(&self, user: User) {
            self.entries.lock().await.push(user);
        }
    }

    fn transport_error() -> CacheError {
        CacheError::Transport(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        )))
    }

    #[async_trait]
    impl UserCache for StubCache {
        async fn get(&self, user_id: i64) -> Result<Option<User>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_get {
                return Err(transport_error());
            }
            Ok(self
                .entries
                .lock()
                .await
                .iter()
                .find(|u| u.id == user_id)
                .cloned())
        }

        async fn set(&self, user: &User) -> Result<(), CacheError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            if self.fail_set {
                return Err(transport_error());
            }
            self.entries.lock().await.push(user.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn cache_hit_skips_the_store() {
        let store = Arc::new(StubStore::with_user(sample_user(1)));
        let cache = Arc::new(StubCache::default());
        cache.preload(sample_user(1)).await;

        let resolver = UserResolver::new(store.clone(), Some(cache));
        let user = resolver.resolve(1).await.unwrap();

        assert_eq!(user.id, 1);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn cache_miss_falls_through_and_populates() {
        let store = Arc::new(StubStore::with_user(sample_user(7)));
        let cache = Arc::new(StubCache::default());

        let resolver = UserResolver::new(store.clone(), Some(cache.clone()));
        let user = resolver.resolve(7).await.unwrap();

        assert_eq!(user.id, 7);
        assert_eq!(store.calls(), 1);
        assert_eq!(cache.sets.load(Ordering::SeqCst), 1);

        // 第二次解析命中缓存，不再回源
        let again = resolver.resolve(7).await.unwrap();
        assert_eq!(again.id, 7);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn disabled_cache_always_uses_the_store() {
        let store = Arc::new(StubStore::with_user(sample_user(3)));

        let resolver = UserResolver::new(store.clone(), None);
        resolver.resolve(3).await.unwrap();
        resolver.resolve(3).await.unwrap();

        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn cache_error_is_a_hard_failure() {
        let store = Arc::new(StubStore::with_user(sample_user(5)));
        let cache = Arc::new(StubCache::failing_get());

        let resolver = UserResolver::new(store.clone(), Some(cache));
        let err = resolver.resolve(5).await.unwrap_err();

        assert!(matches!(err, ResolveError::Cache(_)));
        // 缓存故障不能伪装成未命中去打数据库
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn cache_write_failure_is_swallowed() {
        let store = Arc::new(StubStore::with_user(sample_user(9)));
        let cache = Arc::new(StubCache::failing_set());

        let resolver = UserResolver::new(store.clone(), Some(cache.clone()));
        let user = resolver.resolve(9).await.unwrap();

        assert_eq!(user.id, 9);
        assert_eq!(cache.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_not_found_propagates() {
        let store = Arc::new(StubStore::empty());
        let cache = Arc::new(StubCache::default());

        let resolver = UserResolver::new(store, Some(cache));
        let err = resolver.resolve(404).await.unwrap_err();

        assert!(matches!(err, ResolveError::Store(StoreError::NotFound)));
    }
}
