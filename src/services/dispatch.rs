//! Fan-out of order events to restaurant owners and drivers.

use serde::Serialize;
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;

use super::{claims::CLAIMABLE_ORDER_STATUSES, notifications};
use crate::{
    app_error::AppError,
    app_state::AppState,
    models::{
        CreateNotificationEntity, DeliveryEntity, DeliveryType, DriverEntity, NotificationKind,
        OrderEntity, Recipient, RestaurantEntity,
    },
    push::PushEvent,
};

/// An order a driver could claim right now.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct AvailableOrder {
    pub order: OrderEntity,
    pub estimated_payout_cents: i64,
}

pub(crate) async fn restaurants_of(
    state: &AppState,
    order_id: i32,
) -> Result<Vec<RestaurantEntity>, AppError> {
    let portions = state.store.get_order_portions(order_id).await?;
    let ids: Vec<i32> = portions.iter().map(|p| p.restaurant_id).collect();
    Ok(state.store.get_restaurants(&ids).await?)
}

/// Distinct owners of the restaurants involved in an order.
pub(crate) fn owners_of(restaurants: &[RestaurantEntity]) -> Vec<i32> {
    let mut owners: Vec<i32> = restaurants.iter().map(|r| r.owner_id).collect();
    owners.sort_unstable();
    owners.dedup();
    owners
}

/// Announces a freshly paid order: owners get a `new_order`, and for delivery
/// orders so does every dispatchable driver, together with a repeating alert.
pub async fn announce_paid_order(state: &AppState, order: &OrderEntity) -> Result<(), AppError> {
    let restaurants = restaurants_of(state, order.id).await?;
    let mut batch: Vec<CreateNotificationEntity> = owners_of(&restaurants)
        .into_iter()
        .map(|owner_id| {
            let own: Vec<i32> = restaurants
                .iter()
                .filter(|r| r.owner_id == owner_id)
                .map(|r| r.id)
                .collect();
            CreateNotificationEntity::new(
                Recipient::owner(owner_id),
                NotificationKind::NewOrder,
                order.id,
                json!({
                    "order_id": order.id,
                    "restaurant_ids": own,
                    "delivery_type": order.delivery_type,
                    "special_instructions": order.special_instructions,
                }),
            )
        })
        .collect();

    batch.push(CreateNotificationEntity::new(
        Recipient::customer(order.customer_id),
        NotificationKind::OrderUpdate,
        order.id,
        json!({ "order_id": order.id, "status": order.status }),
    ));

    let mut drivers: Vec<DriverEntity> = Vec::new();
    if order.delivery_type == DeliveryType::Delivery {
        drivers = state.store.list_dispatchable_drivers().await?;
        let payout = state.fees.driver_payout(order.delivery_fee_cents);
        let pickup: Vec<&str> = restaurants.iter().map(|r| r.name.as_str()).collect();
        batch.extend(drivers.iter().map(|driver| {
            CreateNotificationEntity::new(
                Recipient::driver(driver.id),
                NotificationKind::NewOrder,
                order.id,
                json!({
                    "order_id": order.id,
                    "pickup": pickup,
                    "delivery_address": order.delivery_address,
                    "estimated_payout_cents": payout,
                }),
            )
        }));
    }

    notifications::notify_logged(state, batch).await;

    for driver in &drivers {
        state.alerts.raise(driver.id, order.id);
        notifications::push(
            state,
            Recipient::driver(driver.id),
            PushEvent::NewOrderAlert {
                order_ids: state.alerts.pending_for(driver.id),
            },
        );
    }

    info!(
        "Order #{} dispatched to {} drivers and {} restaurants",
        order.id,
        drivers.len(),
        restaurants.len()
    );
    Ok(())
}

/// Tells the customer who is coming and withdraws the order from every other
/// driver's list and alert queue.
pub async fn announce_claim(state: &AppState, order: &OrderEntity, delivery: &DeliveryEntity) {
    state.alerts.clear_order(order.id);

    notifications::notify_logged(
        state,
        vec![CreateNotificationEntity::new(
            Recipient::customer(order.customer_id),
            NotificationKind::OrderUpdate,
            order.id,
            json!({
                "order_id": order.id,
                "delivery_id": delivery.id,
                "delivery_status": delivery.status,
                "driver_id": delivery.driver_id,
            }),
        )],
    )
    .await;

    match state.store.list_dispatchable_drivers().await {
        Ok(drivers) => {
            for driver in drivers
                .iter()
                .filter(|d| Some(d.id) != delivery.driver_id)
            {
                notifications::push(
                    state,
                    Recipient::driver(driver.id),
                    PushEvent::OrderClaimed { order_id: order.id },
                );
            }
        }
        Err(err) => tracing::warn!("Failed to list drivers for claim fan-out: {}", err),
    }
}

/// Snapshot of claimable orders, read in one store call.
pub async fn available_orders(state: &AppState) -> Result<Vec<AvailableOrder>, AppError> {
    let orders = state
        .store
        .list_available_orders(CLAIMABLE_ORDER_STATUSES)
        .await?;
    Ok(orders
        .into_iter()
        .map(|order| AvailableOrder {
            estimated_payout_cents: state.fees.driver_payout(order.delivery_fee_cents),
            order,
        })
        .collect())
}

/// Toggles whether the driver receives dispatch events. Going offline drops
/// any pending alerts.
pub async fn set_availability(
    state: &AppState,
    driver_id: i32,
    available: bool,
) -> Result<DriverEntity, AppError> {
    let driver = state
        .store
        .set_driver_availability(driver_id, available)
        .await?;
    if !available {
        state.alerts.acknowledge(driver_id, None);
    }
    info!(
        "Driver #{} is now {}",
        driver_id,
        if available { "online" } else { "offline" }
    );
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owners_are_deduplicated() {
        let restaurant = |id, owner_id| RestaurantEntity {
            id,
            owner_id,
            name: format!("R{id}"),
            address: "Main St".into(),
        };
        let owners = owners_of(&[restaurant(1, 9), restaurant(2, 4), restaurant(3, 9)]);
        assert_eq!(owners, vec![4, 9]);
    }
}
