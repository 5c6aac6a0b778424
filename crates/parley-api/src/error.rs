use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use parley_core::ChatError;
use parley_types::api::{ErrorCode, Failure, RequestError};

/// Failure envelope with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: Some(detail.into()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.code {
            ErrorCode::MissingField
            | ErrorCode::InvalidText
            | ErrorCode::SelfDmNotAllowed
            | ErrorCode::MissingAction
            | ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::UnauthorizedNoUser => StatusCode::UNAUTHORIZED,
            ErrorCode::NotAMember | ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::UserNotFound | ErrorCode::NotFound | ErrorCode::UnknownAction => StatusCode::NOT_FOUND,
            ErrorCode::StoreUnavailable | ErrorCode::PartialWrite => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match &e {
            ChatError::StoreUnavailable(_) | ChatError::PartialWrite { .. } => error!("Request failed: {}", e),
            _ => warn!("Request rejected: {}", e),
        }
        Self::new(e.code(), e.to_string())
    }
}

impl From<RequestError> for ApiError {
    fn from(e: RequestError) -> Self {
        warn!("Request rejected: {}", e);
        Self::new(e.code(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(Failure::new(self.code, self.detail))).into_response()
    }
}
