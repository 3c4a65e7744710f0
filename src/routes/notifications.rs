use axum::{
    Extension,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    middleware::{self, Actor},
    models::NotificationEntity,
    push::PollSnapshot,
    services::notifications,
};

/// The pull half of notification delivery, available to every role.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/notifications",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(poll))
            .routes(utoipa_axum::routes!(get_notifications))
            .routes(utoipa_axum::routes!(mark_read))
            .routes(utoipa_axum::routes!(mark_all_read))
            .route_layer(axum::middleware::from_fn(
                middleware::any_actor_authorization,
            )),
    )
}

/// Unread count plus the most recent notifications.
#[utoipa::path(
    get,
    path = "/poll",
    tags = ["Notifications"],
    responses(
        (status = 200, description = "Poll successfully", body = StdResponse<PollSnapshot, String>)
    )
)]
async fn poll(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = notifications::poll(&state, actor.recipient()).await?;

    Ok(StdResponse {
        data: Some(snapshot),
        message: Some("Poll successfully"),
    })
}

#[derive(Deserialize, IntoParams)]
struct ListParams {
    /// Maximum number of notifications, newest first
    limit: Option<i64>,
}

/// Fetch the caller's notifications, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Notifications"],
    params(ListParams),
    responses(
        (status = 200, description = "List notifications", body = StdResponse<Vec<NotificationEntity>, String>)
    )
)]
async fn get_notifications(
    Query(params): Query<ListParams>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let items = notifications::list(&state, actor.recipient(), params.limit).await?;

    Ok(StdResponse {
        data: Some(items),
        message: Some("Get notifications successfully"),
    })
}

/// Mark one of the caller's notifications read.
#[utoipa::path(
    post,
    path = "/{id}/read",
    tags = ["Notifications"],
    params(
        ("id" = i32, Path, description = "Notification ID")
    ),
    responses(
        (status = 200, description = "Marked read successfully", body = StdResponse<NotificationEntity, String>),
        (status = 404, description = "No such notification for the caller")
    )
)]
async fn mark_read(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let notification = notifications::mark_read(&state, actor.recipient(), id).await?;

    Ok(StdResponse {
        data: Some(notification),
        message: Some("Marked read successfully"),
    })
}

#[derive(Serialize, ToSchema)]
struct MarkAllRes {
    updated: usize,
}

/// Mark all of the caller's notifications read.
#[utoipa::path(
    post,
    path = "/read-all",
    tags = ["Notifications"],
    responses(
        (status = 200, description = "Marked all read successfully", body = StdResponse<MarkAllRes, String>)
    )
)]
async fn mark_all_read(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let updated = notifications::mark_all_read(&state, actor.recipient()).await?;

    Ok(StdResponse {
        data: Some(MarkAllRes { updated }),
        message: Some("Marked all read successfully"),
    })
}
