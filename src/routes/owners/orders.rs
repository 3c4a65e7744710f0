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
    models::OrderEntity,
    services::orders::{self, PortionCompletion},
};

/// Restaurant-owner order routes.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/owners/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_restaurant_orders))
            .routes(utoipa_axum::routes!(complete_portion))
            .routes(utoipa_axum::routes!(delete_order))
            .route_layer(axum::middleware::from_fn(middleware::owners_authorization)),
    )
}

/// Fetch every order containing items from the owner's restaurants.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Owner orders"],
    responses(
        (status = 200, description = "List restaurant orders", body = StdResponse<Vec<OrderEntity>, String>)
    )
)]
async fn get_restaurant_orders(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let orders = orders::list_for_owner(&state, actor.id).await?;

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get restaurant orders successfully"),
    })
}

/// Mark one restaurant's portion ready. The last portion completes the order.
#[utoipa::path(
    post,
    path = "/{id}/portions/{restaurant_id}/complete",
    tags = ["Owner orders"],
    params(
        ("id" = i32, Path, description = "Order ID"),
        ("restaurant_id" = i32, Path, description = "Restaurant whose portion is ready")
    ),
    responses(
        (status = 200, description = "Marked portion ready successfully", body = StdResponse<PortionCompletion, String>),
        (status = 403, description = "Restaurant belongs to another owner"),
        (status = 409, description = "Order is not paid")
    )
)]
async fn complete_portion(
    Path((id, restaurant_id)): Path<(i32, i32)>,
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, AppError> {
    let completion = orders::mark_portion_complete(&state, actor.id, id, restaurant_id).await?;

    Ok(StdResponse {
        data: Some(completion),
        message: Some("Marked portion ready successfully"),
    })
}

/// Delete a finished or cancelled order.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Owner orders"],
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
