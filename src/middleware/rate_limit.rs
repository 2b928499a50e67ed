use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, hash_map::Entry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

use crate::config::Config;
use crate::utils::{error_codes, error_to_api_response};

/// 固定窗口限流器。每个客户端键一个计数器，窗口到期后整个键被移除而不是清零，
/// 下一次请求按首次请求处理。到期不依赖请求流量：所有截止时间进同一个最小堆，
/// 由唯一的后台清扫任务负责删除
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    clients: RwLock<HashMap<String, u32>>,
    deadlines: Mutex<BinaryHeap<Reverse<(Instant, String)>>>,
    expiry_wakeup: Notify,
    limit: u32,
    window: Duration,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(config: &Config) -> Self {
        let inner = Arc::new(RateLimiterInner {
            clients: RwLock::new(HashMap::new()),
            deadlines: Mutex::new(BinaryHeap::new()),
            expiry_wakeup: Notify::new(),
            limit: config.rate_limit_requests,
            window: config.rate_limit_window(),
            enabled: config.rate_limit_enabled,
        });

        if inner.enabled {
            tokio::spawn(sweep_expired(Arc::clone(&inner)));
        }

        Self { inner }
    }

    /// 判定一次请求是否放行。拒绝时返回建议的重试等待时长；
    /// 没有按键记录窗口起点，所以等待时长取整个窗口长度
    pub async fn allow(&self, client_key: &str) -> (bool, Duration) {
        if !self.inner.enabled {
            return (true, Duration::ZERO);
        }

        // 读锁快速路径：已到上限的键直接拒绝
        {
            let clients = self.inner.clients.read().await;
            if let Some(&count) = clients.get(client_key) {
                if count >= self.inner.limit {
                    return (false, self.inner.window);
                }
            }
        }

        let fresh = {
            let mut clients = self.inner.clients.write().await;
            match clients.entry(client_key.to_string()) {
                Entry::Occupied(mut entry) => {
                    // 写锁下复查，读写锁切换的间隙里别的请求可能已把计数推到上限
                    if *entry.get() >= self.inner.limit {
                        return (false, self.inner.window);
                    }
                    *entry.get_mut() += 1;
                    false
                }
                Entry::Vacant(entry) => {
                    if self.inner.limit == 0 {
                        return (false, self.inner.window);
                    }
                    entry.insert(1);
                    true
                }
            }
        };

        if fresh {
            // 截止时间在计数锁之外登记，清扫任务按 deadlines -> clients 的顺序拿锁
            let deadline = Instant::now() + self.inner.window;
            self.inner
                .deadlines
                .lock()
                .await
                .push(Reverse((deadline, client_key.to_string())));
            self.inner.expiry_wakeup.notify_one();
        }

        (true, Duration::ZERO)
    }

    /// 当前被跟踪的客户端键数量
    pub async fn tracked_clients(&self) -> usize {
        self.inner.clients.read().await.len()
    }
}

/// 唯一的后台清扫任务：睡到最早的截止时间，到点把键从计数表里删掉。
/// 新键登记了更早的截止时间时会被 Notify 唤醒重新计算
async fn sweep_expired(inner: Arc<RateLimiterInner>) {
    loop {
        let next_deadline = {
            let deadlines = inner.deadlines.lock().await;
            deadlines.peek().map(|Reverse((at, _))| *at)
        };

        match next_deadline {
            None => inner.expiry_wakeup.notified().await,
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {
                        let now = Instant::now();
                        let due = {
                            let mut deadlines = inner.deadlines.lock().await;
                            let mut due = Vec::new();
                            while let Some(Reverse((at, _))) = deadlines.peek() {
                                if *at > now {
                                    break;
                                }
                                if let Some(Reverse((_, key))) = deadlines.pop() {
                                    due.push(key);
                                }
                            }
                            due
                        };

                        if !due.is_empty() {
                            let mut clients = inner.clients.write().await;
                            for key in due {
                                clients.remove(&key);
                            }
                        }
                    }
                    _ = inner.expiry_wakeup.notified() => {}
                }
            }
        }
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let client_key = client_key_from_request(&req);

    let (allowed, retry_after) = limiter.allow(&client_key).await;
    if !allowed {
        tracing::warn!("rate limit exceeded for {}", client_key);
        return Ok((
            StatusCode::TOO_MANY_REQUESTS,
            error_to_api_response::<()>(
                error_codes::RATE_LIMIT,
                format!("请求过于频繁，请在{}秒后重试", retry_after.as_secs()),
            ),
        )
            .into_response());
    }

    Ok(next.run(req).await)
}

/// 从请求头中获取客户端IP，降级使用连接信息中的对端地址
fn client_key_from_request(req: &Request<Body>) -> String {
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    req.headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .or_else(|| remote_ip.as_deref())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use axum::{Router, routing::get};
    use futures_util::future::join_all;
    use tower::ServiceExt;

    use super::*;

    fn limiter(limit: u32, window_secs: u64, enabled: bool) -> RateLimiter {
        let config = Config {
            database_url: "postgres://localhost/social".into(),
            redis_url: "redis://localhost".into(),
            redis_enabled: false,
            jwt_secret: "test-secret".into(),
            jwt_issuer: "social-backend".into(),
            jwt_expiration_secs: 3600,
            api_base_uri: "/v1".into(),
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            rate_limit_enabled: enabled,
            rate_limit_window_secs: window_secs,
            rate_limit_requests: limit,
        };
        RateLimiter::new(&config)
    }

    #[tokio::test]
    async fn denies_after_limit_with_retry_hint() {
        let limiter = limiter(3, 5, true);

        for _ in 0..3 {
            let (allowed, _) = limiter.allow("1.2.3.4").await;
            assert!(allowed);
        }

        let (allowed, retry_after) = limiter.allow("1.2.3.4").await;
        assert!(!allowed);
        assert_eq!(retry_after, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = limiter(1, 5, true);

        assert!(limiter.allow("1.1.1.1").await.0);
        assert!(!limiter.allow("1.1.1.1").await.0);
        assert!(limiter.allow("2.2.2.2").await.0);
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_removes_the_key() {
        let limiter = limiter(3, 5, true);

        for _ in 0..3 {
            assert!(limiter.allow("1.2.3.4").await.0);
        }
        assert!(!limiter.allow("1.2.3.4").await.0);

        // 窗口过去后键被整体移除，下一次请求按首次请求处理
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(limiter.tracked_clients().await, 0);
        assert!(limiter.allow("1.2.3.4").await.0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_fires_without_further_traffic() {
        let limiter = limiter(3, 5, true);

        assert!(limiter.allow("9.9.9.9").await.0);
        assert_eq!(limiter.tracked_clients().await, 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(limiter.tracked_clients().await, 0);
    }

    #[tokio::test]
    async fn disabled_limiter_creates_no_state() {
        let limiter = limiter(1, 5, false);

        for _ in 0..10 {
            let (allowed, retry_after) = limiter.allow("1.2.3.4").await;
            assert!(allowed);
            assert_eq!(retry_after, Duration::ZERO);
        }
        assert_eq!(limiter.tracked_clients().await, 0);
    }

    #[tokio::test]
    async fn concurrent_calls_admit_exactly_the_limit() {
        let limiter = limiter(10, 60, true);

        let calls = (0..50).map(|_| {
            let limiter = limiter.clone();
            async move { limiter.allow("1.2.3.4").await.0 }
        });
        let admitted = join_all(calls).await.into_iter().filter(|ok| *ok).count();

        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn middleware_answers_denials_with_the_envelope() {
        let limiter = Arc::new(limiter(1, 60, true));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(limiter, rate_limit));

        let request = || {
            Request::builder()
                .uri("/")
                .header("x-real-ip", "8.8.8.8")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = axum::body::to_bytes(second.into_body(), 1024).await.unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["code"], error_codes::RATE_LIMIT);
    }

    #[tokio::test]
    async fn forwarded_header_takes_precedence() {
        let req = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "5.6.7.8, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key_from_request(&req), "5.6.7.8");
    }
}
