use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::store::StoreError;

/// Standard response envelope shared by every route.
#[derive(Serialize, ToSchema, Debug)]
pub struct StdResponse<T, M> {
    pub data: Option<T>,
    pub message: Option<M>,
}

impl<T: Serialize, M: Serialize> IntoResponse for StdResponse<T, M> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found")]
    NotFound,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    ForbiddenResource(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A state machine rejected the request; `current` is the authoritative status.
    #[error("Cannot move {entity} from `{current}` to `{attempted}`")]
    InvalidTransition {
        entity: &'static str,
        current: String,
        attempted: String,
    },

    #[error("Order #{0} has already been claimed")]
    AlreadyClaimed(i32),

    #[error("{0} is unreachable")]
    ServiceUnreachable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid_transition(
        entity: &'static str,
        current: impl ToString,
        attempted: impl ToString,
    ) -> Self {
        AppError::InvalidTransition {
            entity,
            current: current.to_string(),
            attempted: attempted.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::ForbiddenResource(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTransition { .. } | AppError::AlreadyClaimed(_) => {
                StatusCode::CONFLICT
            }
            AppError::ServiceUnreachable(_) => StatusCode::BAD_GATEWAY,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound,
            StoreError::Duplicate(what) => AppError::BadRequest(what),
            other => AppError::Other(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let data = match &self {
            AppError::InvalidTransition {
                entity,
                current,
                attempted,
            } => Some(json!({
                "entity": entity,
                "current_status": current,
                "attempted_status": attempted,
            })),
            AppError::AlreadyClaimed(order_id) => Some(json!({ "order_id": order_id })),
            _ => None,
        };

        if let AppError::Other(err) = &self {
            tracing::error!("Unhandled error: {:#}", err);
        }

        let body = StdResponse {
            data,
            message: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
