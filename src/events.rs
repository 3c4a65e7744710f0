//! Domain events written to the outbox and relayed to the message broker.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DeliveryType, RefundStatus};

pub const ORDER_PLACED: &str = "orders.order_placed";
pub const ORDER_PAID: &str = "orders.order_paid";
pub const ORDER_CANCELLED: &str = "orders.order_cancelled";
pub const ORDER_COMPLETED: &str = "orders.order_completed";
pub const ORDER_DELIVERED: &str = "orders.order_delivered";
pub const DELIVERY_CLAIMED: &str = "orders.delivery_claimed";
pub const REFUND_RESOLVED: &str = "orders.refund_resolved";

/// Queue the payment gateway bridge publishes confirmed charges to.
pub const PAYMENT_CONFIRMED: &str = "orders.payment_confirmed";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderPlacedEvent {
    pub order_id: i32,
    pub customer_id: i32,
    pub total_cents: i64,
    pub delivery_type: DeliveryType,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderPaidEvent {
    pub order_id: i32,
    pub charge_ref: String,
    pub total_cents: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderCancelledEvent {
    pub order_id: i32,
    pub was_paid: bool,
    pub refund_requested: bool,
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderCompletedEvent {
    pub order_id: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeliveryClaimedEvent {
    pub order_id: i32,
    pub delivery_id: Uuid,
    pub driver_id: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderDeliveredEvent {
    pub order_id: i32,
    pub delivery_id: Uuid,
    pub driver_id: i32,
    pub driver_payout_cents: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefundResolvedEvent {
    pub order_id: i32,
    pub restaurant_id: i32,
    pub amount_cents: i64,
    pub status: RefundStatus,
}

/// Charge confirmation forwarded by the payment gateway bridge.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentConfirmedEvent {
    pub order_id: i32,
    pub charge_ref: String,
}
