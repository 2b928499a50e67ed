use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    error::StoreError,
    utils::{
        error_codes, error_to_api_response, generate_token, hash_password, success_to_api_response,
        verify_password,
    },
};

use super::model::{
    Follower, LoginRequest, LoginResponse, RegisterUserRequest, RegisterUserResponse, User,
};

/// 激活邀请3天后过期
const INVITATION_EXP: std::time::Duration = std::time::Duration::from_secs(3 * 24 * 3600);

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterUserRequest>,
) -> impl IntoResponse {
    if req.username.is_empty() || req.username.len() > 100 {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "用户名长度必须在1到100个字符之间".to_string(),
            ),
        );
    }
    if !req.email.contains('@') || req.email.len() > 255 {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::VALIDATION_ERROR, "邮箱格式无效".to_string()),
        );
    }
    if req.password.len() < 3 || req.password.len() > 72 {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "密码长度必须在3到72个字符之间".to_string(),
            ),
        );
    }

    let password_hash = match hash_password(&req.password) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!("failed to hash password: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "创建用户失败".to_string()),
            );
        }
    };

    let plain_token = uuid::Uuid::new_v4().to_string();

    match User::create_and_invite(&state.pool, &req, &password_hash, &plain_token, INVITATION_EXP)
        .await
    {
        Ok(user) => {
            // 邮件投递不在本服务范围内，激活令牌进日志由运维转交
            tracing::info!("activation token issued for user {}: {}", user.id, plain_token);
            (
                StatusCode::CREATED,
                success_to_api_response(RegisterUserResponse {
                    id: user.id,
                    username: user.username,
                    email: user.email,
                }),
            )
        }
        Err(StoreError::DuplicateEmail) => (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::USER_EXISTS, "该邮箱已被注册".to_string()),
        ),
        Err(StoreError::DuplicateUsername) => (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::USER_EXISTS, "该用户名已被使用".to_string()),
        ),
        Err(e) => {
            tracing::error!("failed to register user: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "创建用户失败".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn activate(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> impl IntoResponse {
    match User::activate(&state.pool, &token).await {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({ "message": "账户已激活" })),
        ),
        Err(StoreError::NotFound) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "激活令牌无效或已过期".to_string()),
        ),
        Err(e) => {
            tracing::error!("failed to activate user: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "激活账户失败".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    // 未注册邮箱和密码错误对外不可区分
    let user = match User::get_by_email(&state.pool, &req.email).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            return (
                StatusCode::UNAUTHORIZED,
                error_to_api_response(error_codes::AUTH_FAILED, "邮箱或密码错误".to_string()),
            );
        }
        Err(e) => {
            tracing::error!("failed to look up user for login: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            );
        }
    };

    let password_matches = match user.password_hash.as_deref() {
        Some(hash) => match verify_password(&req.password, hash) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::error!("failed to verify password: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_to_api_response(error_codes::INTERNAL_ERROR, "验证密码失败".to_string()),
                );
            }
        },
        None => false,
    };
    if !password_matches {
        return (
            StatusCode::UNAUTHORIZED,
            error_to_api_response(error_codes::AUTH_FAILED, "邮箱或密码错误".to_string()),
        );
    }

    match generate_token(user.id, &state.config) {
        Ok(token) => (
            StatusCode::OK,
            success_to_api_response(LoginResponse { token }),
        ),
        Err(e) => {
            tracing::error!("failed to generate token: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "生成令牌失败".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    match User::get_by_id(&state.pool, user_id).await {
        Ok(user) => (StatusCode::OK, success_to_api_response(user)),
        Err(StoreError::NotFound) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
        ),
        Err(e) => {
            tracing::error!("failed to fetch user {}: {}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn follow_user(
    Extension(user): Extension<User>,
    State(state): State<AppState>,
    Path(followed_id): Path<i64>,
) -> impl IntoResponse {
    if followed_id == user.id {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::VALIDATION_ERROR, "不能关注自己".to_string()),
        );
    }

    match Follower::follow(&state.pool, followed_id, user.id).await {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({ "message": "关注成功" })),
        ),
        Err(StoreError::Conflict) => (
            StatusCode::CONFLICT,
            error_to_api_response(error_codes::CONFLICT, "已经关注过该用户".to_string()),
        ),
        Err(StoreError::NotFound) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
        ),
        Err(e) => {
            tracing::error!("failed to follow user: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn unfollow_user(
    Extension(user): Extension<User>,
    State(state): State<AppState>,
    Path(followed_id): Path<i64>,
) -> impl IntoResponse {
    match Follower::unfollow(&state.pool, followed_id, user.id).await {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({ "message": "已取消关注" })),
        ),
        Err(e) => {
            tracing::error!("failed to unfollow user: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}
