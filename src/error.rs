use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::utils::{error_codes, error_to_api_response};

/// 数据库层错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,
    #[error("resource already exists")]
    Conflict,
    #[error("a user with that email already exists")]
    DuplicateEmail,
    #[error("a user with that username already exists")]
    DuplicateUsername,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// 缓存层错误。传输失败和反序列化失败都是硬错误，不能当作未命中处理
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache transport error: {0}")]
    Transport(#[from] redis::RedisError),
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    InternalServerError,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "未授权访问".to_string(),
            ),
            AppError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "内部服务器错误".to_string(),
            ),
        };

        (status, error_to_api_response::<()>(code, msg)).into_response()
    }
}
