use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    middleware::{self, Actor},
    models::{NotificationEntity, OrderEntity},
    services::{
        orders::{self, CancelOrder, CancelOutcome, PlaceOrder},
        refunds,
    },
};

/// Customer-facing order routes.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/customers/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_orders))
            .routes(utoipa_axum::routes!(place_order))
            .routes(utoipa_axum::routes!(cancel_order))
            .routes(utoipa_axum::routes!(request_refund))
            .routes(utoipa_axum::routes!(delete_order))
            .route_layer(axum::middleware::from_fn(
                middleware::customers_authorization,
            )),
    )
}

/// Fetch all orders placed by the authenticated customer, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Customer orders"],
    responses(
        (status = 200, description = "List my orders", body = StdResponse<Vec<OrderEntity>, String>)
    )
)]
async fn get_my_orders(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let orders = orders::list_for_customer(&state, actor.id).await?;

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get my orders successfully"),
    })
}

/// Place a new order. It stays pending until the payment is confirmed.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Customer orders"],
    request_body = PlaceOrder,
    responses(
        (status = 200, description = "Placed order successfully", body = StdResponse<OrderEntity, String>),
        (status = 400, description = "Invalid items or missing delivery address")
    )
)]
async fn place_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<PlaceOrder>,
) -> Result<impl IntoResponse, AppError> {
    let order = orders::place_order(&state, actor.id, body).await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Placed order successfully"),
    })
}

/// Cancel a pending or paid order, optionally asking for a refund.
#[utoipa::path(
    post,
    path = "/{id}/cancel",
    tags = ["Customer orders"],
    params(
        ("id" = i32, Path, description = "Order ID to cancel")
    ),
    request_body = CancelOrder,
    responses(
        (status = 200, description = "Cancelled order successfully", body = StdResponse<CancelOutcome, String>),
        (status = 409, description = "Order can no longer be cancelled")
    )
)]
async fn cancel_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CancelOrder>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = orders::cancel_order(&state, &actor, id, body).await?;

    Ok(StdResponse {
        data: Some(outcome),
        message: Some("Cancelled order successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct RefundReq {
    reason: Option<String>,
}

/// Ask every restaurant in a paid or completed order for a refund of its portion.
#[utoipa::path(
    post,
    path = "/{id}/refund",
    tags = ["Customer orders"],
    params(
        ("id" = i32, Path, description = "Order ID to refund")
    ),
    request_body = RefundReq,
    responses(
        (status = 200, description = "Refund requested successfully", body = StdResponse<Vec<NotificationEntity>, String>),
        (status = 400, description = "Refund already requested"),
        (status = 409, description = "Order is not refundable")
    )
)]
async fn request_refund(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<RefundReq>,
) -> Result<impl IntoResponse, AppError> {
    let requests = refunds::request_refund(&state, actor.id, id, body.reason).await?;

    Ok(StdResponse {
        data: Some(requests),
        message: Some("Refund requested successfully"),
    })
}

/// Delete a finished or cancelled order from the customer's history.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Customer orders"],
    params(
        ("id" = i32, Path, description = "Order ID to delete")
    ),
    responses(
        (status = 200, description = "Deleted order successfully", body = StdResponse<i32, String>),
        (status = 409, description = "Order is still active")
    )
)]
async fn delete_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    orders::delete_order(&state, &actor, id).await?;

    Ok(StdResponse {
        data: Some(id),
        message: Some("Deleted order successfully"),
    })
}
