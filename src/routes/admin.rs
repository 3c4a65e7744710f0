use axum::{extract::State, response::IntoResponse};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    middleware,
    store::PlatformStats,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/admin",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_stats))
            .route_layer(axum::middleware::from_fn(middleware::admins_authorization)),
    )
}

/// Counts of orders, deliveries and refund requests by status.
#[utoipa::path(
    get,
    path = "/stats",
    tags = ["Admin"],
    responses(
        (status = 200, description = "Get stats successfully", body = StdResponse<PlatformStats, String>)
    )
)]
async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let stats = state.store.stats().await?;

    Ok(StdResponse {
        data: Some(stats),
        message: Some("Get stats successfully"),
    })
}
