//! Driver claims. Exactly one claim per order can win; the store enforces it
//! and every loser receives `AlreadyClaimed`.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{dispatch, load_order};
use crate::{
    app_error::AppError,
    app_state::AppState,
    events,
    models::{ApprovalStatus, CreateDeliveryEntity, DeliveryEntity, DeliveryStatus, DeliveryType, OrderStatus},
    outbox::OutboxEvent,
    store::ClaimOutcome,
};

/// Orders become claimable once paid and stay claimable after the kitchen
/// finishes, so a driver can still be found for food that is already waiting.
pub const CLAIMABLE_ORDER_STATUSES: &[OrderStatus] = &[OrderStatus::Paid, OrderStatus::Completed];

/// Maximum distance a driver may report for a delivery.
pub const MAX_DISTANCE_MILES: f64 = 100.0;

pub fn validate_distance(distance: f64) -> Result<f64, AppError> {
    if distance.is_finite() && (0.0..=MAX_DISTANCE_MILES).contains(&distance) {
        Ok(distance)
    } else {
        Err(AppError::BadRequest(format!(
            "distance must be between 0 and {MAX_DISTANCE_MILES} miles"
        )))
    }
}

fn not_claimable(order_id: i32, delivery_type: DeliveryType, status: OrderStatus) -> AppError {
    if delivery_type == DeliveryType::Pickup {
        AppError::BadRequest(format!("order #{order_id} is for pickup"))
    } else {
        AppError::invalid_transition("order", status, DeliveryStatus::Claimed)
    }
}

pub async fn claim_order(
    state: &AppState,
    driver_id: i32,
    order_id: i32,
    distance_miles: Option<f64>,
) -> Result<DeliveryEntity, AppError> {
    let driver = state
        .store
        .get_driver(driver_id)
        .await?
        .ok_or_else(|| AppError::ForbiddenResource("driver profile not found".into()))?;
    if driver.approval_status != ApprovalStatus::Approved {
        return Err(AppError::ForbiddenResource(format!(
            "driver #{driver_id} is {}",
            driver.approval_status
        )));
    }
    if !driver.is_available {
        return Err(AppError::ForbiddenResource(
            "go online before claiming orders".into(),
        ));
    }

    let distance_miles =
        validate_distance(distance_miles.unwrap_or(state.fees.default_distance_miles))?;

    let order = load_order(state, order_id).await?;
    if order.delivery_type != DeliveryType::Delivery
        || !CLAIMABLE_ORDER_STATUSES.contains(&order.status)
    {
        return Err(not_claimable(order_id, order.delivery_type, order.status));
    }

    let restaurants = dispatch::restaurants_of(state, order_id).await?;
    let pickup_location = restaurants
        .iter()
        .map(|r| format!("{} ({})", r.name, r.address))
        .collect::<Vec<_>>()
        .join("; ");

    let delivery_id = Uuid::new_v4();
    let event = OutboxEvent::new(
        events::DELIVERY_CLAIMED,
        &events::DeliveryClaimedEvent {
            order_id,
            delivery_id,
            driver_id,
        },
    )
    .map_err(anyhow::Error::from)?;

    let outcome = state
        .store
        .claim_delivery(
            CreateDeliveryEntity {
                id: delivery_id,
                order_id,
                driver_id: Some(driver_id),
                status: DeliveryStatus::Claimed,
                claimed_at: Some(Utc::now()),
                driver_payout_cents: state.fees.driver_payout(order.delivery_fee_cents),
                distance_miles,
                pickup_location,
                delivery_location: order.delivery_address.clone().unwrap_or_default(),
            },
            CLAIMABLE_ORDER_STATUSES,
            event,
        )
        .await?;

    match outcome {
        ClaimOutcome::Claimed(delivery) => {
            info!("Order #{} claimed by driver #{}", order_id, driver_id);
            dispatch::announce_claim(state, &order, &delivery).await;
            Ok(delivery)
        }
        ClaimOutcome::AlreadyClaimed => {
            info!("Driver #{} lost the claim on order #{}", driver_id, order_id);
            Err(AppError::AlreadyClaimed(order_id))
        }
        ClaimOutcome::NotClaimable(current) => Err(not_claimable(
            order_id,
            current.delivery_type,
            current.status,
        )),
    }
}
