use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    middleware::{self, Actor},
    models::DriverEntity,
    services::dispatch,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/drivers/me",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(set_availability))
            .routes(utoipa_axum::routes!(ack_alerts))
            .route_layer(axum::middleware::from_fn(
                middleware::drivers_authorization,
            )),
    )
}

#[derive(Deserialize, ToSchema)]
struct AvailabilityReq {
    is_available: bool,
}

/// Go online or offline. Only online drivers receive new orders.
#[utoipa::path(
    put,
    path = "/availability",
    tags = ["Drivers"],
    request_body = AvailabilityReq,
    responses(
        (status = 200, description = "Updated availability successfully", body = StdResponse<DriverEntity, String>),
        (status = 404, description = "Driver profile not found")
    )
)]
async fn set_availability(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<AvailabilityReq>,
) -> Result<impl IntoResponse, AppError> {
    let driver = dispatch::set_availability(&state, actor.id, body.is_available).await?;

    Ok(StdResponse {
        data: Some(driver),
        message: Some("Updated availability successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct AckReq {
    /// Acknowledge every pending alert when absent
    order_id: Option<i32>,
}

#[derive(Serialize, ToSchema)]
struct AckRes {
    cleared: usize,
    pending: Vec<i32>,
}

/// Stop the repeating new-order alert. Acknowledging twice is harmless.
#[utoipa::path(
    post,
    path = "/alerts/ack",
    tags = ["Drivers"],
    request_body = AckReq,
    responses(
        (status = 200, description = "Acknowledged alerts successfully", body = StdResponse<AckRes, String>)
    )
)]
async fn ack_alerts(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<AckReq>,
) -> Result<impl IntoResponse, AppError> {
    let cleared = state.alerts.acknowledge(actor.id, body.order_id);

    Ok(StdResponse {
        data: Some(AckRes {
            cleared,
            pending: state.alerts.pending_for(actor.id),
        }),
        message: Some("Acknowledged alerts successfully"),
    })
}
