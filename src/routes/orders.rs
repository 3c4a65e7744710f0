use axum::{
    Extension,
    extract::{Path, State},
    response::IntoResponse,
};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    middleware::{self, Actor},
    services::orders::{self, OrderDetails},
};

/// Order details shared by every role that takes part in the order.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_order))
            .route_layer(axum::middleware::from_fn(
                middleware::any_actor_authorization,
            )),
    )
}

/// Fetch an order with its items, portions and live delivery.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    params(
        ("id" = i32, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<OrderDetails, String>),
        (status = 403, description = "Caller takes no part in the order"),
        (status = 404, description = "Order not found")
    )
)]
async fn get_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let details = orders::get_order_details(&state, &actor, id).await?;

    Ok(StdResponse {
        data: Some(details),
        message: Some("Get order successfully"),
    })
}
