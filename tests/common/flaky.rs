use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foodhub_orderservice::{
    models::{
        CreateDeliveryEntity, CreateDriverEntity, CreateNotificationEntity, CreateOrderEntity,
        CreateOrderItemEntity, CreateRestaurantEntity, DeliveryEntity, DeliveryStatus,
        DeliveryUpdateEntity, DriverEntity, NotificationEntity, OrderEntity, OrderItemEntity,
        OrderPortionEntity, OrderStatus, OutboxEntity, Recipient, RefundRequestPayload,
        RestaurantEntity,
    },
    outbox::OutboxEvent,
    store::{
        Cas, ClaimOutcome, DeliveryAdvance, MemoryStore, PlatformStats, PortionProgress,
        RefundResolution, Store, StoreError, StoreResult,
    },
};
use uuid::Uuid;

/// Memory store whose driver lookups can be switched to fail, for paths that
/// must survive a read error after their write has committed.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_driver_lookups: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_driver_lookups: AtomicBool::new(false),
        }
    }

    pub fn set_driver_lookups_failing(&self, failing: bool) {
        self.fail_driver_lookups.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_restaurant(&self, new: CreateRestaurantEntity) -> StoreResult<RestaurantEntity> {
        self.inner.insert_restaurant(new).await
    }
    async fn get_restaurants(&self, ids: &[i32]) -> StoreResult<Vec<RestaurantEntity>> {
        self.inner.get_restaurants(ids).await
    }
    async fn list_restaurants_for_owner(&self, owner_id: i32) -> StoreResult<Vec<RestaurantEntity>> {
        self.inner.list_restaurants_for_owner(owner_id).await
    }

    async fn insert_driver(&self, new: CreateDriverEntity) -> StoreResult<DriverEntity> {
        self.inner.insert_driver(new).await
    }
    async fn get_driver(&self, id: i32) -> StoreResult<Option<DriverEntity>> {
        self.inner.get_driver(id).await
    }
    async fn set_driver_availability(&self, id: i32, available: bool) -> StoreResult<DriverEntity> {
        self.inner.set_driver_availability(id, available).await
    }
    async fn list_dispatchable_drivers(&self) -> StoreResult<Vec<DriverEntity>> {
        if self.fail_driver_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Pool("timed out waiting for a connection".into()));
        }
        self.inner.list_dispatchable_drivers().await
    }

    async fn insert_order(
        &self,
        order: CreateOrderEntity,
        items: Vec<CreateOrderItemEntity>,
    ) -> StoreResult<OrderEntity> {
        self.inner.insert_order(order, items).await
    }
    async fn get_order(&self, id: i32) -> StoreResult<Option<OrderEntity>> {
        self.inner.get_order(id).await
    }
    async fn get_order_items(&self, order_id: i32) -> StoreResult<Vec<OrderItemEntity>> {
        self.inner.get_order_items(order_id).await
    }
    async fn get_order_portions(&self, order_id: i32) -> StoreResult<Vec<OrderPortionEntity>> {
        self.inner.get_order_portions(order_id).await
    }
    async fn list_orders_for_customer(&self, customer_id: i32) -> StoreResult<Vec<OrderEntity>> {
        self.inner.list_orders_for_customer(customer_id).await
    }
    async fn list_orders_for_restaurants(&self, restaurant_ids: &[i32]) -> StoreResult<Vec<OrderEntity>> {
        self.inner.list_orders_for_restaurants(restaurant_ids).await
    }

    async fn transition_order(
        &self,
        order_id: i32,
        from: &[OrderStatus],
        to: OrderStatus,
        cancel_reason: Option<String>,
        event: Option<OutboxEvent>,
    ) -> StoreResult<Cas<OrderEntity, OrderStatus>> {
        self.inner
            .transition_order(order_id, from, to, cancel_reason, event)
            .await
    }

    async fn mark_portion_ready(
        &self,
        order_id: i32,
        restaurant_id: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<PortionProgress> {
        self.inner.mark_portion_ready(order_id, restaurant_id, at).await
    }

    async fn delete_order(&self, order_id: i32) -> StoreResult<Cas<(), OrderStatus>> {
        self.inner.delete_order(order_id).await
    }

    async fn claim_delivery(
        &self,
        new: CreateDeliveryEntity,
        claimable: &[OrderStatus],
        event: OutboxEvent,
    ) -> StoreResult<ClaimOutcome> {
        self.inner.claim_delivery(new, claimable, event).await
    }
    async fn get_delivery(&self, id: Uuid) -> StoreResult<Option<DeliveryEntity>> {
        self.inner.get_delivery(id).await
    }
    async fn get_active_delivery_for_order(&self, order_id: i32) -> StoreResult<Option<DeliveryEntity>> {
        self.inner.get_active_delivery_for_order(order_id).await
    }
    async fn list_deliveries_for_driver(&self, driver_id: i32) -> StoreResult<Vec<DeliveryEntity>> {
        self.inner.list_deliveries_for_driver(driver_id).await
    }
    async fn list_delivery_updates(&self, delivery_id: Uuid) -> StoreResult<Vec<DeliveryUpdateEntity>> {
        self.inner.list_delivery_updates(delivery_id).await
    }

    async fn advance_delivery(
        &self,
        advance: DeliveryAdvance,
    ) -> StoreResult<Cas<DeliveryEntity, DeliveryStatus>> {
        self.inner.advance_delivery(advance).await
    }

    async fn cancel_delivery_for_order(&self, order_id: i32) -> StoreResult<Option<DeliveryEntity>> {
        self.inner.cancel_delivery_for_order(order_id).await
    }

    async fn list_available_orders(&self, claimable: &[OrderStatus]) -> StoreResult<Vec<OrderEntity>> {
        self.inner.list_available_orders(claimable).await
    }

    async fn insert_notifications(
        &self,
        new: Vec<CreateNotificationEntity>,
    ) -> StoreResult<Vec<NotificationEntity>> {
        self.inner.insert_notifications(new).await
    }
    async fn get_notification(&self, id: i32) -> StoreResult<Option<NotificationEntity>> {
        self.inner.get_notification(id).await
    }
    async fn list_notifications(
        &self,
        recipient: Recipient,
        limit: i64,
    ) -> StoreResult<Vec<NotificationEntity>> {
        self.inner.list_notifications(recipient, limit).await
    }
    async fn count_unread(&self, recipient: Recipient) -> StoreResult<i64> {
        self.inner.count_unread(recipient).await
    }
    async fn mark_read(&self, id: i32, recipient: Recipient) -> StoreResult<Option<NotificationEntity>> {
        self.inner.mark_read(id, recipient).await
    }
    async fn mark_all_read(&self, recipient: Recipient) -> StoreResult<usize> {
        self.inner.mark_all_read(recipient).await
    }
    async fn list_refund_requests(&self, order_id: i32) -> StoreResult<Vec<NotificationEntity>> {
        self.inner.list_refund_requests(order_id).await
    }
    async fn open_refund_requests(
        &self,
        order_id: i32,
        requests: Vec<CreateNotificationEntity>,
    ) -> StoreResult<Vec<NotificationEntity>> {
        self.inner.open_refund_requests(order_id, requests).await
    }

    async fn resolve_refund(
        &self,
        resolution: RefundResolution,
        event: OutboxEvent,
    ) -> StoreResult<Cas<NotificationEntity, RefundRequestPayload>> {
        self.inner.resolve_refund(resolution, event).await
    }
    async fn record_refund_audit(
        &self,
        notification_id: i32,
        payload: RefundRequestPayload,
    ) -> StoreResult<NotificationEntity> {
        self.inner.record_refund_audit(notification_id, payload).await
    }

    async fn fetch_pending_outbox(&self, limit: i64) -> StoreResult<Vec<OutboxEntity>> {
        self.inner.fetch_pending_outbox(limit).await
    }
    async fn mark_outbox_published(&self, ids: &[i32]) -> StoreResult<()> {
        self.inner.mark_outbox_published(ids).await
    }

    async fn stats(&self) -> StoreResult<PlatformStats> {
        self.inner.stats().await
    }
}
