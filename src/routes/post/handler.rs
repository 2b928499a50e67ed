use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    error::StoreError,
    utils::{error_codes, error_to_api_response, success_to_api_response},
};

use super::model::{
    Comment, CreateCommentRequest, CreatePostRequest, FeedQuery, Post, PostDetailResponse,
    UpdatePostRequest,
};
use crate::routes::user::model::User;

fn validate_title(title: &str) -> Option<String> {
    if title.is_empty() || title.len() > 100 {
        return Some("标题长度必须在1到100个字符之间".to_string());
    }
    None
}

fn validate_content(content: &str) -> Option<String> {
    if content.is_empty() || content.len() > 1000 {
        return Some("内容长度必须在1到1000个字符之间".to_string());
    }
    None
}

#[axum::debug_handler]
pub async fn create_post(
    Extension(user): Extension<User>,
    State(state): State<AppState>,
    Json(req): Json<CreatePostRequest>,
) -> impl IntoResponse {
    if let Some(msg) = validate_title(&req.title).or_else(|| validate_content(&req.content)) {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::VALIDATION_ERROR, msg),
        );
    }

    match Post::create(&state.pool, user.id, &req).await {
        Ok(post) => (StatusCode::CREATED, success_to_api_response(post)),
        Err(e) => {
            tracing::error!("failed to create post: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "发布帖子失败".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn get_post(State(state): State<AppState>, Path(post_id): Path<i64>) -> impl IntoResponse {
    let post = match Post::get_by_id(&state.pool, post_id).await {
        Ok(post) => post,
        Err(StoreError::NotFound) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "帖子不存在".to_string()),
            );
        }
        Err(e) => {
            tracing::error!("failed to fetch post {}: {}", post_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            );
        }
    };

    match Comment::get_by_post_id(&state.pool, post_id).await {
        Ok(comments) => (
            StatusCode::OK,
            success_to_api_response(PostDetailResponse { post, comments }),
        ),
        Err(e) => {
            tracing::error!("failed to fetch comments for post {}: {}", post_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            )
        }
    }
}

/// 更新走乐观并发控制：先取当前帖子拿到观察版本，再以该版本做条件更新。
/// 条件更新落空既可能是帖子被删也可能是版本被别人抢先推进，这里不做自动重试，
/// 统一提示客户端重新获取后再决定
#[axum::debug_handler]
pub async fn update_post(
    Extension(user): Extension<User>,
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Json(req): Json<UpdatePostRequest>,
) -> impl IntoResponse {
    let post = match Post::get_by_id(&state.pool, post_id).await {
        Ok(post) => post,
        Err(StoreError::NotFound) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "帖子不存在".to_string()),
            );
        }
        Err(e) => {
            tracing::error!("failed to fetch post {}: {}", post_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            );
        }
    };

    if post.user_id != user.id {
        return (
            StatusCode::FORBIDDEN,
            error_to_api_response(
                error_codes::PERMISSION_DENIED,
                "无权修改他人的帖子".to_string(),
            ),
        );
    }

    let title = req.title.as_deref().unwrap_or(&post.title);
    let content = req.content.as_deref().unwrap_or(&post.content);
    let tags = req.tags.as_deref().unwrap_or(&post.tags);

    if let Some(msg) = validate_title(title).or_else(|| validate_content(content)) {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::VALIDATION_ERROR, msg),
        );
    }

    match Post::update(&state.pool, post_id, post.version, title, content, tags).await {
        Ok(new_version) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({
                "id": post_id,
                "version": new_version,
            })),
        ),
        Err(StoreError::NotFound) => (
            StatusCode::CONFLICT,
            error_to_api_response(
                error_codes::CONFLICT,
                "帖子已被并发修改或删除，请重新获取后重试".to_string(),
            ),
        ),
        Err(e) => {
            tracing::error!("failed to update post {}: {}", post_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "更新帖子失败".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn delete_post(
    Extension(user): Extension<User>,
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> impl IntoResponse {
    let post = match Post::get_by_id(&state.pool, post_id).await {
        Ok(post) => post,
        Err(StoreError::NotFound) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "帖子不存在".to_string()),
            );
        }
        Err(e) => {
            tracing::error!("failed to fetch post {}: {}", post_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            );
        }
    };

    if post.user_id != user.id {
        return (
            StatusCode::FORBIDDEN,
            error_to_api_response(
                error_codes::PERMISSION_DENIED,
                "无权删除他人的帖子".to_string(),
            ),
        );
    }

    match Post::delete(&state.pool, post_id).await {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({ "message": "帖子已删除" })),
        ),
        Err(StoreError::NotFound) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "帖子不存在".to_string()),
        ),
        Err(e) => {
            tracing::error!("failed to delete post {}: {}", post_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "删除帖子失败".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn get_feed(
    Extension(user): Extension<User>,
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> impl IntoResponse {
    match Post::user_feed(&state.pool, user.id, &query).await {
        Ok(posts) => (StatusCode::OK, success_to_api_response(posts)),
        Err(e) => {
            tracing::error!("failed to fetch feed for user {}: {}", user.id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "获取动态流失败".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn create_comment(
    Extension(user): Extension<User>,
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Json(req): Json<CreateCommentRequest>,
) -> impl IntoResponse {
    if let Some(msg) = validate_content(&req.content) {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::VALIDATION_ERROR, msg),
        );
    }

    match Comment::create(&state.pool, post_id, user.id, &req.content).await {
        Ok(comment) => (StatusCode::CREATED, success_to_api_response(comment)),
        Err(StoreError::NotFound) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "帖子不存在".to_string()),
        ),
        Err(e) => {
            tracing::error!("failed to create comment: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "发表评论失败".to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn get_comments(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> impl IntoResponse {
    match Comment::get_by_post_id(&state.pool, post_id).await {
        Ok(comments) => (StatusCode::OK, success_to_api_response(comments)),
        Err(e) => {
            tracing::error!("failed to fetch comments for post {}: {}", post_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "获取评论失败".to_string()),
            )
        }
    }
}
