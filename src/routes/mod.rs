pub mod admin;
pub mod customers;
pub mod drivers;
pub mod notifications;
pub mod orders;
pub mod owners;
pub mod payments;
pub mod ws;

use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa_axum::router::OpenApiRouter;

use crate::app_state::AppState;

/// Every documented HTTP route.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    orders::routes_with_openapi()
        .merge(customers::orders::routes_with_openapi())
        .merge(owners::orders::routes_with_openapi())
        .merge(owners::refunds::routes_with_openapi())
        .merge(drivers::deliveries::routes_with_openapi())
        .merge(drivers::profile::routes_with_openapi())
        .merge(notifications::routes_with_openapi())
        .merge(payments::routes_with_openapi())
        .merge(admin::routes_with_openapi())
}

/// The full application with its state applied.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes_with_openapi())
        .merge(ws::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
