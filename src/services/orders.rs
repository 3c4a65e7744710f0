use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{clean_text, dispatch, load_order, notifications, refunds};
use crate::{
    api::payments::{ChargeStatus, GatewayError},
    app_error::AppError,
    app_state::AppState,
    events,
    lifecycle::order::{self as order_lifecycle, OrderTransition},
    middleware::Actor,
    models::{
        ActorRole, CreateNotificationEntity, CreateOrderEntity, CreateOrderItemEntity,
        DeliveryEntity, DeliveryType, NotificationEntity, NotificationKind, OrderEntity,
        OrderItemEntity, OrderPortionEntity, OrderStatus, Recipient,
    },
    outbox::OutboxEvent,
    store::{Cas, portion_subtotals},
};

#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct PlaceOrderItem {
    pub dish_id: i32,
    pub restaurant_id: i32,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
}

#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct PlaceOrder {
    pub delivery_type: DeliveryType,
    pub delivery_address: Option<String>,
    pub delivery_phone: Option<String>,
    pub special_instructions: Option<String>,
    pub items: Vec<PlaceOrderItem>,
}

#[derive(Deserialize, ToSchema, Debug, Clone, Default)]
pub struct CancelOrder {
    pub reason: Option<String>,
    #[serde(default)]
    pub request_refund: bool,
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct OrderDetails {
    pub order: OrderEntity,
    pub items: Vec<OrderItemEntity>,
    pub portions: Vec<OrderPortionEntity>,
    pub delivery: Option<DeliveryEntity>,
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct PaymentConfirmation {
    pub order: OrderEntity,
    /// False when the order had already been confirmed.
    pub newly_paid: bool,
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct CancelOutcome {
    pub order: OrderEntity,
    pub cancelled_delivery: Option<DeliveryEntity>,
    pub refund_requests: Vec<NotificationEntity>,
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct PortionCompletion {
    pub order: OrderEntity,
    pub newly_ready: bool,
    pub outstanding: i64,
}

fn validate_items(items: &[PlaceOrderItem]) -> Result<(), AppError> {
    if items.is_empty() {
        return Err(AppError::BadRequest("an order needs at least one item".into()));
    }
    for item in items {
        if item.quantity <= 0 {
            return Err(AppError::BadRequest(format!(
                "quantity of `{}` must be positive",
                item.name
            )));
        }
        if item.unit_price_cents < 0 {
            return Err(AppError::BadRequest(format!(
                "price of `{}` cannot be negative",
                item.name
            )));
        }
        if item.name.trim().is_empty() {
            return Err(AppError::BadRequest("item names cannot be blank".into()));
        }
    }
    Ok(())
}

/// Creates a pending order. Pricing is fixed here and never recomputed.
pub async fn place_order(
    state: &AppState,
    customer_id: i32,
    input: PlaceOrder,
) -> Result<OrderEntity, AppError> {
    validate_items(&input.items)?;
    let special_instructions = clean_text("special_instructions", input.special_instructions)?;
    let delivery_address = clean_text("delivery_address", input.delivery_address)?;
    let delivery_phone = clean_text("delivery_phone", input.delivery_phone)?;
    if input.delivery_type == DeliveryType::Delivery && delivery_address.is_none() {
        return Err(AppError::BadRequest(
            "delivery orders need a delivery address".into(),
        ));
    }

    let restaurant_ids: BTreeSet<i32> = input.items.iter().map(|i| i.restaurant_id).collect();
    let restaurant_ids: Vec<i32> = restaurant_ids.into_iter().collect();
    let known = state.store.get_restaurants(&restaurant_ids).await?;
    if let Some(missing) = restaurant_ids
        .iter()
        .find(|id| !known.iter().any(|r| r.id == **id))
    {
        return Err(AppError::BadRequest(format!(
            "restaurant #{missing} does not exist"
        )));
    }

    let items: Vec<CreateOrderItemEntity> = input
        .items
        .into_iter()
        .enumerate()
        .map(|(position, item)| CreateOrderItemEntity {
            order_id: 0,
            dish_id: item.dish_id,
            restaurant_id: item.restaurant_id,
            name: item.name.trim().to_string(),
            unit_price_cents: item.unit_price_cents,
            quantity: item.quantity,
            position: position as i32,
        })
        .collect();

    let subtotal_cents: i64 = portion_subtotals(&items).values().sum();
    let delivery_fee_cents = match input.delivery_type {
        DeliveryType::Delivery => state.fees.delivery_fee_cents,
        DeliveryType::Pickup => 0,
    };
    let platform_fee_cents = state.fees.platform_fee(subtotal_cents);

    let order = state
        .store
        .insert_order(
            CreateOrderEntity {
                customer_id,
                status: OrderStatus::Pending,
                delivery_type: input.delivery_type,
                subtotal_cents,
                delivery_fee_cents,
                platform_fee_cents,
                total_cents: subtotal_cents + delivery_fee_cents + platform_fee_cents,
                delivery_address,
                delivery_phone,
                special_instructions,
            },
            items,
        )
        .await?;

    info!(
        "Order #{} placed by customer #{} for {} cents",
        order.id, customer_id, order.total_cents
    );
    Ok(order)
}

/// Whether `actor` may see the order: its customer, an owner of one of its
/// restaurants, the driver delivering it, or an admin.
async fn can_view(state: &AppState, actor: &Actor, order: &OrderEntity) -> Result<bool, AppError> {
    Ok(match actor.role {
        ActorRole::Admin => true,
        ActorRole::Customer => order.customer_id == actor.id,
        ActorRole::Owner => dispatch::restaurants_of(state, order.id)
            .await?
            .iter()
            .any(|r| r.owner_id == actor.id),
        ActorRole::Driver => state
            .store
            .get_active_delivery_for_order(order.id)
            .await?
            .is_some_and(|d| d.driver_id == Some(actor.id)),
    })
}

pub async fn get_order_details(
    state: &AppState,
    actor: &Actor,
    order_id: i32,
) -> Result<OrderDetails, AppError> {
    let order = load_order(state, order_id).await?;
    if !can_view(state, actor, &order).await? {
        return Err(AppError::ForbiddenResource(format!(
            "order #{order_id} is not yours"
        )));
    }

    Ok(OrderDetails {
        items: state.store.get_order_items(order.id).await?,
        portions: state.store.get_order_portions(order.id).await?,
        delivery: state.store.get_active_delivery_for_order(order.id).await?,
        order,
    })
}

pub async fn list_for_customer(
    state: &AppState,
    customer_id: i32,
) -> Result<Vec<OrderEntity>, AppError> {
    Ok(state.store.list_orders_for_customer(customer_id).await?)
}

pub async fn list_for_owner(state: &AppState, owner_id: i32) -> Result<Vec<OrderEntity>, AppError> {
    let restaurants = state.store.list_restaurants_for_owner(owner_id).await?;
    let ids: Vec<i32> = restaurants.iter().map(|r| r.id).collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(state.store.list_orders_for_restaurants(&ids).await?)
}

/// Moves a pending order to paid once the gateway confirms the charge.
/// Confirming an order that is already past payment is a no-op.
pub async fn confirm_payment(
    state: &AppState,
    order_id: i32,
    charge_ref: &str,
) -> Result<PaymentConfirmation, AppError> {
    let order = load_order(state, order_id).await?;
    match order.status {
        OrderStatus::Pending => {}
        OrderStatus::Paid | OrderStatus::Completed | OrderStatus::Delivered => {
            info!("Order #{} already paid, ignoring confirmation", order_id);
            return Ok(PaymentConfirmation {
                order,
                newly_paid: false,
            });
        }
        OrderStatus::Cancelled => {
            return Err(AppError::invalid_transition(
                "order",
                order.status,
                OrderStatus::Paid,
            ));
        }
    }

    let verification = state
        .gateway
        .verify_charge(charge_ref)
        .await
        .map_err(|err| match err {
            GatewayError::Unreachable(_) | GatewayError::BadResponse(_) => {
                warn!("Charge {} for order #{} unverified: {}", charge_ref, order_id, err);
                AppError::ServiceUnreachable("Payment gateway".into())
            }
        })?;
    if verification.status != ChargeStatus::Succeeded {
        return Err(AppError::BadRequest(format!(
            "charge {charge_ref} has not succeeded"
        )));
    }
    if verification.amount_cents != order.total_cents {
        return Err(AppError::BadRequest(format!(
            "charge {charge_ref} covers {} cents, order total is {}",
            verification.amount_cents, order.total_cents
        )));
    }

    let event = OutboxEvent::new(
        events::ORDER_PAID,
        &events::OrderPaidEvent {
            order_id,
            charge_ref: charge_ref.to_string(),
            total_cents: order.total_cents,
        },
    )
    .map_err(anyhow::Error::from)?;

    let transition = OrderTransition::ConfirmPayment;
    let paid = match state
        .store
        .transition_order(order_id, transition.sources(), transition.target(), None, Some(event))
        .await?
    {
        Cas::Applied(order) => order,
        // A concurrent confirmation got there first.
        Cas::Rejected(OrderStatus::Paid) => {
            return Ok(PaymentConfirmation {
                order: load_order(state, order_id).await?,
                newly_paid: false,
            });
        }
        Cas::Rejected(current) => {
            return Err(AppError::invalid_transition("order", current, OrderStatus::Paid));
        }
    };

    info!("Order #{} paid with charge {}", order_id, charge_ref);
    // The payment is committed; a failed announcement must not undo that.
    if let Err(err) = dispatch::announce_paid_order(state, &paid).await {
        warn!("Order #{} paid but not announced: {}", order_id, err);
    }

    Ok(PaymentConfirmation {
        order: paid,
        newly_paid: true,
    })
}

/// Cancels a pending or paid order. A claimed delivery is cancelled with it,
/// and a paid order may open one refund request per restaurant.
pub async fn cancel_order(
    state: &AppState,
    actor: &Actor,
    order_id: i32,
    input: CancelOrder,
) -> Result<CancelOutcome, AppError> {
    let reason = clean_text("reason", input.reason)?;
    let order = load_order(state, order_id).await?;
    if !(actor.is_admin() || (actor.role == ActorRole::Customer && order.customer_id == actor.id)) {
        return Err(AppError::ForbiddenResource(format!(
            "order #{order_id} is not yours"
        )));
    }

    let target = order_lifecycle::apply(order.status, OrderTransition::Cancel)?;
    let was_paid = order.status == OrderStatus::Paid;
    let refund_requested = was_paid && input.request_refund;

    let event = OutboxEvent::new(
        events::ORDER_CANCELLED,
        &events::OrderCancelledEvent {
            order_id,
            was_paid,
            refund_requested,
            reason: reason.clone(),
        },
    )
    .map_err(anyhow::Error::from)?;

    let cancelled = match state
        .store
        .transition_order(order_id, &[order.status], target, reason.clone(), Some(event))
        .await?
    {
        Cas::Applied(order) => order,
        Cas::Rejected(current) => {
            return Err(AppError::invalid_transition("order", current, target));
        }
    };
    info!("Order #{} cancelled from {}", order_id, order.status);

    let cancelled_delivery = state.store.cancel_delivery_for_order(order_id).await?;
    let restaurants = dispatch::restaurants_of(state, order_id).await?;

    let mut batch: Vec<CreateNotificationEntity> = dispatch::owners_of(&restaurants)
        .into_iter()
        .map(|owner_id| {
            CreateNotificationEntity::new(
                Recipient::owner(owner_id),
                NotificationKind::OrderCancelled,
                order_id,
                json!({ "order_id": order_id, "reason": reason }),
            )
        })
        .collect();
    if let Some(driver_id) = cancelled_delivery.as_ref().and_then(|d| d.driver_id) {
        batch.push(CreateNotificationEntity::new(
            Recipient::driver(driver_id),
            NotificationKind::OrderCancelled,
            order_id,
            json!({ "order_id": order_id, "reason": reason }),
        ));
    }
    notifications::notify_logged(state, batch).await;
    state.alerts.clear_order(order_id);

    let refund_requests = if refund_requested {
        refunds::open_for_order(state, &cancelled, reason).await?
    } else {
        Vec::new()
    };

    Ok(CancelOutcome {
        order: cancelled,
        cancelled_delivery,
        refund_requests,
    })
}

/// Marks one restaurant's share of a paid order ready. The last portion moves
/// the order to completed.
pub async fn mark_portion_complete(
    state: &AppState,
    owner_id: i32,
    order_id: i32,
    restaurant_id: i32,
) -> Result<PortionCompletion, AppError> {
    let restaurant = state
        .store
        .get_restaurants(&[restaurant_id])
        .await?
        .pop()
        .ok_or(AppError::NotFound)?;
    if restaurant.owner_id != owner_id {
        return Err(AppError::ForbiddenResource(format!(
            "restaurant #{restaurant_id} is not yours"
        )));
    }

    let progress = state
        .store
        .mark_portion_ready(order_id, restaurant_id, Utc::now())
        .await?;
    if progress.order_status != OrderStatus::Paid {
        return Err(AppError::invalid_transition(
            "order",
            progress.order_status,
            OrderStatus::Completed,
        ));
    }

    // Zero outstanding also retries a completion that failed after the last mark.
    if progress.outstanding > 0 {
        return Ok(PortionCompletion {
            order: load_order(state, order_id).await?,
            newly_ready: progress.newly_ready,
            outstanding: progress.outstanding,
        });
    }

    let event = OutboxEvent::new(
        events::ORDER_COMPLETED,
        &events::OrderCompletedEvent { order_id },
    )
    .map_err(anyhow::Error::from)?;
    let transition = OrderTransition::Complete;
    let order = match state
        .store
        .transition_order(order_id, transition.sources(), transition.target(), None, Some(event))
        .await?
    {
        Cas::Applied(order) => order,
        Cas::Rejected(OrderStatus::Completed) => {
            return Ok(PortionCompletion {
                order: load_order(state, order_id).await?,
                newly_ready: progress.newly_ready,
                outstanding: 0,
            });
        }
        Cas::Rejected(current) => {
            return Err(AppError::invalid_transition(
                "order",
                current,
                OrderStatus::Completed,
            ));
        }
    };
    info!("Order #{} completed by all restaurants", order_id);

    let mut batch = vec![CreateNotificationEntity::new(
        Recipient::customer(order.customer_id),
        NotificationKind::OrderCompleted,
        order_id,
        json!({ "order_id": order_id, "delivery_type": order.delivery_type }),
    )];
    if let Some(driver_id) = state
        .store
        .get_active_delivery_for_order(order_id)
        .await?
        .and_then(|d| d.driver_id)
    {
        batch.push(CreateNotificationEntity::new(
            Recipient::driver(driver_id),
            NotificationKind::OrderCompleted,
            order_id,
            json!({ "order_id": order_id, "ready_for_pickup": true }),
        ));
    }
    notifications::notify_logged(state, batch).await;

    Ok(PortionCompletion {
        order,
        newly_ready: progress.newly_ready,
        outstanding: 0,
    })
}

/// Deletes an order that is no longer active and has no delivery on the road.
pub async fn delete_order(state: &AppState, actor: &Actor, order_id: i32) -> Result<(), AppError> {
    let order = load_order(state, order_id).await?;
    let allowed = match actor.role {
        ActorRole::Admin => true,
        ActorRole::Customer => order.customer_id == actor.id,
        ActorRole::Owner => dispatch::restaurants_of(state, order_id)
            .await?
            .iter()
            .any(|r| r.owner_id == actor.id),
        ActorRole::Driver => false,
    };
    if !allowed {
        return Err(AppError::ForbiddenResource(format!(
            "order #{order_id} is not yours"
        )));
    }

    match state.store.delete_order(order_id).await? {
        Cas::Applied(()) => {
            info!("Order #{} deleted by {} #{}", order_id, actor.role, actor.id);
            Ok(())
        }
        Cas::Rejected(current) => Err(AppError::invalid_transition("order", current, "deleted")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: i32, unit_price_cents: i64) -> PlaceOrderItem {
        PlaceOrderItem {
            dish_id: 1,
            restaurant_id: 1,
            name: "Pad Thai".into(),
            unit_price_cents,
            quantity,
        }
    }

    #[test]
    fn rejects_empty_and_non_positive_items() {
        assert!(validate_items(&[]).is_err());
        assert!(validate_items(&[item(0, 100)]).is_err());
        assert!(validate_items(&[item(1, -1)]).is_err());
        assert!(validate_items(&[item(2, 0)]).is_ok());
    }
}
