use axum::{http::StatusCode, response::IntoResponse};

use crate::utils::success_to_api_response;

#[axum::debug_handler]
pub async fn health_check() -> impl IntoResponse {
    let env = if cfg!(debug_assertions) {
        "development"
    } else {
        "production"
    };

    (
        StatusCode::OK,
        success_to_api_response(serde_json::json!({
            "status": "ok",
            "env": env,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
