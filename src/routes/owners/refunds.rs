use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    lifecycle::refund::RefundAction,
    middleware::{self, Actor},
    models::NotificationEntity,
    services::{
        notifications::MAX_LIST_LIMIT,
        refunds::{self, RefundResolutionOutcome},
    },
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/owners/refunds",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_pending_refunds))
            .routes(utoipa_axum::routes!(resolve_refund))
            .route_layer(axum::middleware::from_fn(middleware::owners_authorization)),
    )
}

#[derive(Deserialize, IntoParams)]
struct PendingParams {
    /// How many recent notifications to scan
    limit: Option<i64>,
}

/// Fetch refund requests still awaiting the owner's decision.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Refunds"],
    params(PendingParams),
    responses(
        (status = 200, description = "List pending refunds", body = StdResponse<Vec<NotificationEntity>, String>)
    )
)]
async fn get_pending_refunds(
    Query(params): Query<PendingParams>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let pending = refunds::list_pending_for_owner(&state, actor.id, limit).await?;

    Ok(StdResponse {
        data: Some(pending),
        message: Some("Get pending refunds successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct ResolveRefundReq {
    action: RefundAction,
    notes: Option<String>,
}

/// Approve or deny one restaurant's refund request.
#[utoipa::path(
    post,
    path = "/{id}/resolve",
    tags = ["Refunds"],
    params(
        ("id" = i32, Path, description = "Refund request (notification) ID")
    ),
    request_body = ResolveRefundReq,
    responses(
        (status = 200, description = "Resolved refund successfully", body = StdResponse<RefundResolutionOutcome, String>),
        (status = 403, description = "Request belongs to another restaurant"),
        (status = 409, description = "Request was already resolved")
    )
)]
async fn resolve_refund(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<ResolveRefundReq>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = refunds::resolve(&state, actor.id, id, body.action, body.notes).await?;

    Ok(StdResponse {
        data: Some(outcome),
        message: Some("Resolved refund successfully"),
    })
}
