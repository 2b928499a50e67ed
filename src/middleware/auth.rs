use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};

use crate::AppState;
use crate::error::{AppError, ResolveError, StoreError};
use crate::utils::verify_token;

/// 认证中间件：Authorization 头 -> Bearer 令牌 -> 验签 -> 解析用户身份。
/// 拒绝原因只进日志，对外统一返回 401，避免暴露具体失败在哪一步。
/// 解析过程中的基础设施故障（缓存、数据库）不是认证失败，返回 500
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(auth_header) = auth_header else {
        tracing::warn!("authorization header is missing");
        return Err(AppError::Unauthorized);
    };

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        tracing::warn!("authorization header is malformed");
        return Err(AppError::Unauthorized);
    };

    let claims = match verify_token(token, &state.config) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("invalid or expired token: {}", e);
            return Err(AppError::Unauthorized);
        }
    };

    let user = match state.resolver.resolve(claims.sub).await {
        Ok(user) => user,
        Err(ResolveError::Store(StoreError::NotFound)) => {
            tracing::warn!("token subject {} does not resolve to a user", claims.sub);
            return Err(AppError::Unauthorized);
        }
        Err(e) => {
            tracing::error!("identity resolution failed for {}: {}", claims.sub, e);
            return Err(AppError::InternalServerError);
        }
    };

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
