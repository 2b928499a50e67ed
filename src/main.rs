use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use social_backend::{
    AppState,
    cache::{RedisUserCache, UserCache, UserResolver},
    config::Config,
    middleware::{RateLimiter, auth_middleware, log_errors, rate_limit},
    routes,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'social_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    // 用户缓存可整体停用，停用时身份解析直接回源数据库
    let user_cache: Option<Arc<dyn UserCache>> = if config.redis_enabled {
        let redis_client =
            redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
        tracing::info!("User cache enabled");
        Some(Arc::new(RedisUserCache::new(Arc::new(redis_client))))
    } else {
        tracing::info!("User cache disabled, resolving users from Postgres only");
        None
    };

    let resolver = Arc::new(UserResolver::new(Arc::new(pool.clone()), user_cache));

    // 设置应用状态
    let state = AppState {
        pool,
        config: config.clone(),
        resolver,
    };

    // 设置限流器
    let rate_limiter = Arc::new(RateLimiter::new(&config));

    // 将路由分为公开路由和受保护路由
    let public_routes = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/users/register", post(routes::user::register))
        .route("/users/activate/{token}", put(routes::user::activate))
        .route("/users/login", post(routes::user::login));

    let protected_routes = Router::new()
        // 用户路由
        .route("/users/{id}", get(routes::user::get_profile))
        .route("/users/{id}/follow", put(routes::user::follow_user))
        .route("/users/{id}/unfollow", put(routes::user::unfollow_user))
        // 帖子路由
        .route("/posts", post(routes::post::create_post))
        .route("/posts/feed", get(routes::post::get_feed))
        .route(
            "/posts/{id}",
            get(routes::post::get_post)
                .put(routes::post::update_post)
                .delete(routes::post::delete_post),
        )
        .route(
            "/posts/{id}/comments",
            get(routes::post::get_comments).post(routes::post::create_comment),
        )
        // 应用认证中间件
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // 创建基础路由
    let router = Router::new().nest(
        &config.api_base_uri.clone(),
        Router::new().merge(public_routes).merge(protected_routes),
    );

    // 添加日志中间件和限流中间件
    let router = router.layer(axum::middleware::from_fn(log_errors)).layer(
        axum::middleware::from_fn_with_state(rate_limiter, rate_limit),
    );

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        let cors = CorsLayer::permissive();
        router.layer(cors)
    };

    // 添加应用状态
    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
