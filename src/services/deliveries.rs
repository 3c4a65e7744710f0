use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{clean_text, load_order, notifications};
use crate::{
    app_error::AppError,
    app_state::AppState,
    lifecycle::delivery as delivery_lifecycle,
    middleware::Actor,
    models::{
        ActorRole, CreateNotificationEntity, DeliveryEntity, DeliveryStatus, DeliveryUpdateEntity,
        NotificationKind, OrderStatus, Recipient,
    },
    store::{Cas, DeliveryAdvance},
};

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct DeliveryDetails {
    pub delivery: DeliveryEntity,
    pub updates: Vec<DeliveryUpdateEntity>,
}

pub async fn list_for_driver(
    state: &AppState,
    driver_id: i32,
) -> Result<Vec<DeliveryEntity>, AppError> {
    Ok(state.store.list_deliveries_for_driver(driver_id).await?)
}

pub async fn get_details(
    state: &AppState,
    actor: &Actor,
    delivery_id: Uuid,
) -> Result<DeliveryDetails, AppError> {
    let delivery = state
        .store
        .get_delivery(delivery_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !(actor.is_admin()
        || (actor.role == ActorRole::Driver && delivery.driver_id == Some(actor.id)))
    {
        return Err(AppError::ForbiddenResource(
            "delivery is assigned to another driver".into(),
        ));
    }

    Ok(DeliveryDetails {
        updates: state.store.list_delivery_updates(delivery_id).await?,
        delivery,
    })
}

/// Moves the driver's delivery one step forward. Pickup waits for the
/// kitchen; delivery marks the order delivered and schedules the payout in
/// the same store write.
pub async fn advance(
    state: &AppState,
    driver_id: i32,
    delivery_id: Uuid,
    requested: DeliveryStatus,
    notes: Option<String>,
) -> Result<DeliveryEntity, AppError> {
    let notes = clean_text("notes", notes)?;
    let delivery = state
        .store
        .get_delivery(delivery_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if delivery.driver_id != Some(driver_id) {
        return Err(AppError::ForbiddenResource(
            "delivery is assigned to another driver".into(),
        ));
    }
    delivery_lifecycle::check_advance(delivery.status, requested)?;

    let order = load_order(state, delivery.order_id).await?;
    if requested == DeliveryStatus::PickedUp && order.status != OrderStatus::Completed {
        return Err(AppError::invalid_transition("order", order.status, requested));
    }

    let updated = match state
        .store
        .advance_delivery(DeliveryAdvance {
            delivery_id,
            driver_id,
            from: delivery.status,
            to: requested,
            notes: notes.clone(),
            at: Utc::now(),
        })
        .await?
    {
        Cas::Applied(delivery) => delivery,
        Cas::Rejected(current) => {
            return Err(AppError::invalid_transition("delivery", current, requested));
        }
    };
    info!(
        "Delivery {} for order #{} is now {}",
        delivery_id, order.id, requested
    );

    notifications::notify_logged(
        state,
        vec![CreateNotificationEntity::new(
            Recipient::customer(order.customer_id),
            NotificationKind::OrderUpdate,
            order.id,
            json!({
                "order_id": order.id,
                "delivery_id": delivery_id,
                "delivery_status": requested,
                "notes": notes,
            }),
        )],
    )
    .await;

    Ok(updated)
}
