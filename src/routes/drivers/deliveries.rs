use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    middleware::{self, Actor},
    models::{DeliveryEntity, DeliveryStatus},
    services::{
        claims,
        deliveries::{self, DeliveryDetails},
        dispatch::{self, AvailableOrder},
    },
};

/// Driver dispatch routes: browsing, claiming and progressing deliveries.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/drivers",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_available_orders))
            .routes(utoipa_axum::routes!(claim_order))
            .routes(utoipa_axum::routes!(get_my_deliveries))
            .routes(utoipa_axum::routes!(get_delivery))
            .routes(utoipa_axum::routes!(update_delivery_status))
            .route_layer(axum::middleware::from_fn(
                middleware::drivers_authorization,
            )),
    )
}

/// Fetch orders that are paid, need delivery and have no driver yet.
#[utoipa::path(
    get,
    path = "/available-orders",
    tags = ["Deliveries"],
    responses(
        (status = 200, description = "List claimable orders", body = StdResponse<Vec<AvailableOrder>, String>)
    )
)]
async fn get_available_orders(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let available = dispatch::available_orders(&state).await?;

    Ok(StdResponse {
        data: Some(available),
        message: Some("Get available orders successfully"),
    })
}

#[derive(Deserialize, ToSchema, Default)]
struct ClaimReq {
    /// Estimated trip length; the configured default applies when absent
    distance_miles: Option<f64>,
}

/// Claim an order for delivery. Only the first claim wins.
#[utoipa::path(
    post,
    path = "/orders/{id}/claim",
    tags = ["Deliveries"],
    params(
        ("id" = i32, Path, description = "Order ID to claim")
    ),
    request_body = ClaimReq,
    responses(
        (status = 200, description = "Claimed order successfully", body = StdResponse<DeliveryEntity, String>),
        (status = 403, description = "Driver is not approved or offline"),
        (status = 409, description = "Order was already claimed or is not claimable")
    )
)]
async fn claim_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<ClaimReq>,
) -> Result<impl IntoResponse, AppError> {
    let delivery = claims::claim_order(&state, actor.id, id, body.distance_miles).await?;

    Ok(StdResponse {
        data: Some(delivery),
        message: Some("Claimed order successfully"),
    })
}

/// Fetch the authenticated driver's deliveries, newest first.
#[utoipa::path(
    get,
    path = "/deliveries",
    tags = ["Deliveries"],
    responses(
        (status = 200, description = "List my deliveries", body = StdResponse<Vec<DeliveryEntity>, String>)
    )
)]
async fn get_my_deliveries(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let deliveries = deliveries::list_for_driver(&state, actor.id).await?;

    Ok(StdResponse {
        data: Some(deliveries),
        message: Some("Get my deliveries successfully"),
    })
}

/// Fetch one delivery with its status history.
#[utoipa::path(
    get,
    path = "/deliveries/{id}",
    tags = ["Deliveries"],
    params(
        ("id" = Uuid, Path, description = "Delivery ID")
    ),
    responses(
        (status = 200, description = "Get delivery successfully", body = StdResponse<DeliveryDetails, String>),
        (status = 404, description = "Delivery not found")
    )
)]
async fn get_delivery(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let details = deliveries::get_details(&state, &actor, id).await?;

    Ok(StdResponse {
        data: Some(details),
        message: Some("Get delivery successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct UpdateStatusReq {
    status: DeliveryStatus,
    notes: Option<String>,
}

/// Advance a delivery: picked_up, then in_transit, then delivered.
#[utoipa::path(
    post,
    path = "/deliveries/{id}/status",
    tags = ["Deliveries"],
    params(
        ("id" = Uuid, Path, description = "Delivery ID")
    ),
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Updated delivery successfully", body = StdResponse<DeliveryEntity, String>),
        (status = 403, description = "Delivery belongs to another driver"),
        (status = 409, description = "Status cannot move that way yet")
    )
)]
async fn update_delivery_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<UpdateStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let delivery = deliveries::advance(&state, actor.id, id, body.status, body.notes).await?;

    Ok(StdResponse {
        data: Some(delivery),
        message: Some("Updated delivery successfully"),
    })
}
