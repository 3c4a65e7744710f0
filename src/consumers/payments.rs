use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicRejectOptions},
};
use tracing::{info, warn};

use crate::{
    app_error::AppError, app_state::AppState, events::PaymentConfirmedEvent,
    services::orders,
};

/// Charge confirmations relayed by the payment gateway bridge. Re-deliveries
/// are harmless because confirming a paid order is a no-op.
pub fn payment_confirmed(
    delivery: Delivery,
    state: Arc<AppState>,
) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
        let payload: PaymentConfirmedEvent = match serde_json::from_slice(&delivery.data) {
            Ok(payload) => payload,
            Err(err) => {
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await?;
                return Err(err.into());
            }
        };
        info!("Received event: {:?}", payload);

        match orders::confirm_payment(&state, payload.order_id, &payload.charge_ref).await {
            Ok(confirmation) => {
                info!(
                    "Order #{} payment confirmed (newly paid: {})",
                    payload.order_id, confirmation.newly_paid
                );
            }
            // Transient failures; let the broker redeliver.
            Err(err @ (AppError::ServiceUnreachable(_) | AppError::Other(_))) => {
                warn!(
                    "Confirming order #{} failed, requeueing: {}",
                    payload.order_id, err
                );
                delivery
                    .reject(BasicRejectOptions { requeue: true })
                    .await?;
                return Ok(());
            }
            Err(err) => {
                warn!(
                    "Dropping payment confirmation for order #{}: {}",
                    payload.order_id, err
                );
            }
        }

        delivery.ack(BasicAckOptions::default()).await?;

        Ok(())
    })
}
