use axum::{Json, extract::State, response::IntoResponse};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    services::orders::{self, PaymentConfirmation},
};

/// Callbacks from the payment gateway bridge. Not exposed through the
/// public gateway, so no actor headers are expected.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/payments",
        OpenApiRouter::new().routes(utoipa_axum::routes!(confirm_payment)),
    )
}

#[derive(Deserialize, ToSchema)]
pub struct ConfirmPaymentReq {
    order_id: i32,
    charge_ref: String,
}

/// Confirm a charge. The gateway is asked for the charge status before the
/// order moves to paid; repeated confirmations are no-ops.
#[utoipa::path(
    post,
    path = "/confirm",
    tags = ["Payments"],
    request_body = ConfirmPaymentReq,
    responses(
        (status = 200, description = "Payment confirmed successfully", body = StdResponse<PaymentConfirmation, String>),
        (status = 400, description = "Charge did not succeed or amount differs"),
        (status = 409, description = "Order was cancelled"),
        (status = 502, description = "Payment gateway unreachable")
    )
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(body): Json<ConfirmPaymentReq>,
) -> Result<impl IntoResponse, AppError> {
    let confirmation = orders::confirm_payment(&state, body.order_id, &body.charge_ref).await?;

    Ok(StdResponse {
        data: Some(confirmation),
        message: Some("Payment confirmed successfully"),
    })
}
