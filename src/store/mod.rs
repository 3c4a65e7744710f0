//! Persistence seam for the dispatch engine.
//!
//! Every method is one store round-trip. Methods that move a status are
//! compare-and-set: they only write when the row still holds one of the
//! expected statuses and otherwise hand back the status they found.

pub mod memory;
pub mod pg;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{
    CreateDeliveryEntity, CreateDriverEntity, CreateNotificationEntity, CreateOrderEntity,
    CreateOrderItemEntity, CreateRestaurantEntity, DeliveryEntity, DeliveryStatus,
    DeliveryUpdateEntity, DriverEntity, NotificationEntity, OrderEntity, OrderItemEntity,
    OrderPortionEntity, OrderStatus, OutboxEntity, Recipient, RefundRequestPayload,
    RefundStatus, RestaurantEntity,
};
use crate::{events, outbox::OutboxEvent};

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a compare-and-set write.
#[derive(Debug, Clone, PartialEq)]
pub enum Cas<T, S> {
    Applied(T),
    /// The row was not in an expected state; carries what was found.
    Rejected(S),
}

/// Result of marking one restaurant's portion ready.
#[derive(Debug, Clone, PartialEq)]
pub struct PortionProgress {
    /// False when the portion had already been marked ready.
    pub newly_ready: bool,
    /// Portions of the order still waiting on their restaurant.
    pub outstanding: i64,
    pub order_status: OrderStatus,
}

/// Result of the atomic claim write.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(DeliveryEntity),
    AlreadyClaimed,
    /// The order is no longer (or not yet) in a claimable state.
    NotClaimable(OrderEntity),
}

/// Requested movement of a delivery along its status line.
#[derive(Debug, Clone)]
pub struct DeliveryAdvance {
    pub delivery_id: Uuid,
    pub driver_id: i32,
    pub from: DeliveryStatus,
    pub to: DeliveryStatus,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

/// Audit fields written when an owner resolves a refund portion.
#[derive(Debug, Clone)]
pub struct RefundResolution {
    pub notification_id: i32,
    pub resolved: RefundRequestPayload,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema, PartialEq)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema, PartialEq)]
pub struct PlatformStats {
    pub orders: Vec<StatusCount>,
    pub deliveries: Vec<StatusCount>,
    pub refunds: Vec<StatusCount>,
}

pub(crate) fn order_placed_event(order: &OrderEntity) -> StoreResult<OutboxEvent> {
    OutboxEvent::new(
        events::ORDER_PLACED,
        &events::OrderPlacedEvent {
            order_id: order.id,
            customer_id: order.customer_id,
            total_cents: order.total_cents,
            delivery_type: order.delivery_type,
        },
    )
    .map_err(|e| StoreError::Malformed(e.to_string()))
}

pub(crate) fn order_delivered_event(
    delivery: &DeliveryEntity,
    driver_id: i32,
) -> StoreResult<OutboxEvent> {
    OutboxEvent::new(
        events::ORDER_DELIVERED,
        &events::OrderDeliveredEvent {
            order_id: delivery.order_id,
            delivery_id: delivery.id,
            driver_id,
            driver_payout_cents: delivery.driver_payout_cents,
        },
    )
    .map_err(|e| StoreError::Malformed(e.to_string()))
}

/// Restaurant a `refund_request` payload is addressed to.
pub(crate) fn refund_restaurant_id(payload: &serde_json::Value) -> Option<i64> {
    payload.get("restaurant_id").and_then(serde_json::Value::as_i64)
}

/// Keeps the first request per restaurant among those not yet `opened`.
pub(crate) fn unopened_refunds(
    opened: &[serde_json::Value],
    requests: Vec<CreateNotificationEntity>,
) -> Vec<CreateNotificationEntity> {
    let mut seen: BTreeSet<i64> = opened.iter().filter_map(refund_restaurant_id).collect();
    requests
        .into_iter()
        .filter(|r| refund_restaurant_id(&r.payload).is_some_and(|id| seen.insert(id)))
        .collect()
}

/// Subtotal per restaurant, keyed by restaurant id.
pub fn portion_subtotals(items: &[CreateOrderItemEntity]) -> BTreeMap<i32, i64> {
    let mut portions = BTreeMap::new();
    for item in items {
        *portions.entry(item.restaurant_id).or_insert(0) +=
            item.unit_price_cents * i64::from(item.quantity);
    }
    portions
}

pub(crate) fn refund_counts(statuses: &[RefundStatus]) -> Vec<StatusCount> {
    [
        (RefundStatus::Pending, "pending"),
        (RefundStatus::Approved, "approved"),
        (RefundStatus::Denied, "denied"),
    ]
    .into_iter()
    .map(|(status, label)| StatusCount {
        status: label.to_string(),
        count: statuses.iter().filter(|s| **s == status).count() as i64,
    })
    .collect()
}

#[async_trait]
pub trait Store: Send + Sync {
    // Restaurants and drivers are owned by the catalog and account services;
    // the engine only needs to seed and read them.
    async fn insert_restaurant(&self, new: CreateRestaurantEntity) -> StoreResult<RestaurantEntity>;
    async fn get_restaurants(&self, ids: &[i32]) -> StoreResult<Vec<RestaurantEntity>>;
    async fn list_restaurants_for_owner(&self, owner_id: i32) -> StoreResult<Vec<RestaurantEntity>>;

    async fn insert_driver(&self, new: CreateDriverEntity) -> StoreResult<DriverEntity>;
    async fn get_driver(&self, id: i32) -> StoreResult<Option<DriverEntity>>;
    async fn set_driver_availability(&self, id: i32, available: bool) -> StoreResult<DriverEntity>;
    /// Approved and available drivers.
    async fn list_dispatchable_drivers(&self) -> StoreResult<Vec<DriverEntity>>;

    /// Inserts the order, its items, one portion per restaurant and the
    /// `orders.order_placed` outbox event.
    async fn insert_order(
        &self,
        order: CreateOrderEntity,
        items: Vec<CreateOrderItemEntity>,
    ) -> StoreResult<OrderEntity>;
    async fn get_order(&self, id: i32) -> StoreResult<Option<OrderEntity>>;
    async fn get_order_items(&self, order_id: i32) -> StoreResult<Vec<OrderItemEntity>>;
    async fn get_order_portions(&self, order_id: i32) -> StoreResult<Vec<OrderPortionEntity>>;
    async fn list_orders_for_customer(&self, customer_id: i32) -> StoreResult<Vec<OrderEntity>>;
    async fn list_orders_for_restaurants(&self, restaurant_ids: &[i32]) -> StoreResult<Vec<OrderEntity>>;

    /// Moves the order to `to` if its status is in `from`; `cancel_reason` is
    /// written alongside when present.
    async fn transition_order(
        &self,
        order_id: i32,
        from: &[OrderStatus],
        to: OrderStatus,
        cancel_reason: Option<String>,
        event: Option<OutboxEvent>,
    ) -> StoreResult<Cas<OrderEntity, OrderStatus>>;

    /// Marks a portion ready while holding the order row, so the last portion
    /// always observes zero outstanding. Nothing is written unless the order
    /// is paid.
    async fn mark_portion_ready(
        &self,
        order_id: i32,
        restaurant_id: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<PortionProgress>;

    /// Deletes the order only when its status is not active and no driver is
    /// still carrying it.
    async fn delete_order(&self, order_id: i32) -> StoreResult<Cas<(), OrderStatus>>;

    /// Atomic claim: checks the order is claimable and inserts the delivery
    /// such that at most one non-cancelled delivery exists per order.
    async fn claim_delivery(
        &self,
        new: CreateDeliveryEntity,
        claimable: &[OrderStatus],
        event: OutboxEvent,
    ) -> StoreResult<ClaimOutcome>;
    async fn get_delivery(&self, id: Uuid) -> StoreResult<Option<DeliveryEntity>>;
    async fn get_active_delivery_for_order(&self, order_id: i32) -> StoreResult<Option<DeliveryEntity>>;
    async fn list_deliveries_for_driver(&self, driver_id: i32) -> StoreResult<Vec<DeliveryEntity>>;
    async fn list_delivery_updates(&self, delivery_id: Uuid) -> StoreResult<Vec<DeliveryUpdateEntity>>;

    /// Compare-and-set on delivery status. Reaching `delivered` also schedules
    /// the payout, credits the driver's counters and moves the order from
    /// completed to delivered (with `orders.order_delivered`) in the same write.
    async fn advance_delivery(
        &self,
        advance: DeliveryAdvance,
    ) -> StoreResult<Cas<DeliveryEntity, DeliveryStatus>>;

    /// Cancels a delivery that has not been picked up yet.
    async fn cancel_delivery_for_order(&self, order_id: i32) -> StoreResult<Option<DeliveryEntity>>;

    /// Orders a driver may claim: claimable status, delivery type, no live delivery.
    async fn list_available_orders(&self, claimable: &[OrderStatus]) -> StoreResult<Vec<OrderEntity>>;

    async fn insert_notifications(
        &self,
        new: Vec<CreateNotificationEntity>,
    ) -> StoreResult<Vec<NotificationEntity>>;
    async fn get_notification(&self, id: i32) -> StoreResult<Option<NotificationEntity>>;
    /// Newest first by `created_at`, ties broken by id.
    async fn list_notifications(
        &self,
        recipient: Recipient,
        limit: i64,
    ) -> StoreResult<Vec<NotificationEntity>>;
    async fn count_unread(&self, recipient: Recipient) -> StoreResult<i64>;
    async fn mark_read(&self, id: i32, recipient: Recipient) -> StoreResult<Option<NotificationEntity>>;
    async fn mark_all_read(&self, recipient: Recipient) -> StoreResult<usize>;
    async fn list_refund_requests(&self, order_id: i32) -> StoreResult<Vec<NotificationEntity>>;
    /// Inserts the `refund_request` notifications whose restaurant has none
    /// for this order yet. Check and insert happen under one lock on the
    /// order; returns only what was inserted.
    async fn open_refund_requests(
        &self,
        order_id: i32,
        requests: Vec<CreateNotificationEntity>,
    ) -> StoreResult<Vec<NotificationEntity>>;

    /// Writes the resolved payload only while the stored payload is still pending.
    async fn resolve_refund(
        &self,
        resolution: RefundResolution,
        event: OutboxEvent,
    ) -> StoreResult<Cas<NotificationEntity, RefundRequestPayload>>;
    /// Overwrites the audit fields of an already resolved request.
    async fn record_refund_audit(
        &self,
        notification_id: i32,
        payload: RefundRequestPayload,
    ) -> StoreResult<NotificationEntity>;

    async fn fetch_pending_outbox(&self, limit: i64) -> StoreResult<Vec<OutboxEntity>>;
    async fn mark_outbox_published(&self, ids: &[i32]) -> StoreResult<()>;

    async fn stats(&self) -> StoreResult<PlatformStats>;
}
