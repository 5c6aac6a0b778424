use std::sync::Arc;

use axum::{Extension, Json, body::Bytes, extract::State, response::IntoResponse};
use serde_json::{Value, json};
use tracing::error;

use parley_types::api::{ChatRequest, ErrorCode, Success};

use crate::AppStateInner;
use crate::error::ApiError;
use crate::middleware::Caller;

/// Single action endpoint. The body names the action; the caller comes from
/// the identity header, or from a `userId` body field when that fallback is
/// enabled.
pub async fn handle(
    State(state): State<Arc<AppStateInner>>,
    caller: Option<Extension<Caller>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::new(ErrorCode::BadRequest, format!("body is not JSON: {}", e)))?;

    let request = ChatRequest::parse(&body)?;

    let caller = match caller {
        Some(Extension(Caller(id))) => id,
        None if state.allow_body_user_id => body
            .get("userId")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::new(ErrorCode::UnauthorizedNoUser, "no caller identity"))?,
        None => return Err(ApiError::new(ErrorCode::UnauthorizedNoUser, "no caller identity")),
    };

    // Engine calls are blocking store round trips; keep them off the runtime
    let response = tokio::task::spawn_blocking(move || state.engine.handle(&caller, request))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::new(ErrorCode::Internal, "request worker failed")
        })??;

    Ok(Json(Success::new(response)))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}
