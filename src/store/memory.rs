//! In-process store used by tests and local runs without PostgreSQL.
//!
//! One mutex guards every table, so each trait method is a single critical
//! section and compare-and-set writes are trivially atomic.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    Cas, ClaimOutcome, DeliveryAdvance, PlatformStats, PortionProgress, RefundResolution,
    StatusCount, Store, StoreError, StoreResult, order_delivered_event, order_placed_event,
    portion_subtotals, unopened_refunds,
};
use crate::{
    models::{
        CreateDeliveryEntity, CreateDriverEntity, CreateNotificationEntity, CreateOrderEntity,
        CreateOrderItemEntity, CreateRestaurantEntity, DeliveryEntity, DeliveryStatus,
        DeliveryType, DeliveryUpdateEntity, DriverEntity, NotificationEntity, NotificationKind,
        OrderEntity, OrderItemEntity, OrderPortionEntity, OrderStatus, OutboxEntity,
        PayoutStatus, Recipient, RefundRequestPayload, RefundStatus, RestaurantEntity,
    },
    outbox::{OutboxEvent, STATUS_PENDING, STATUS_PUBLISHED},
};

#[derive(Default)]
struct Sequences {
    restaurant: i32,
    driver: i32,
    order: i32,
    order_item: i32,
    delivery_update: i32,
    notification: i32,
    outbox: i32,
}

fn next(seq: &mut i32) -> i32 {
    *seq += 1;
    *seq
}

#[derive(Default)]
struct Tables {
    seq: Sequences,
    restaurants: BTreeMap<i32, RestaurantEntity>,
    drivers: BTreeMap<i32, DriverEntity>,
    orders: BTreeMap<i32, OrderEntity>,
    order_items: Vec<OrderItemEntity>,
    portions: Vec<OrderPortionEntity>,
    deliveries: Vec<DeliveryEntity>,
    delivery_updates: Vec<DeliveryUpdateEntity>,
    notifications: Vec<NotificationEntity>,
    outbox: Vec<OutboxEntity>,
}

impl Tables {
    fn push_outbox(&mut self, event: OutboxEvent) {
        let now = Utc::now();
        let id = next(&mut self.seq.outbox);
        self.outbox.push(OutboxEntity {
            id,
            event_type: event.event_type,
            payload: event.payload,
            status: STATUS_PENDING.into(),
            created_at: now,
            updated_at: now,
        });
    }

    fn push_delivery_update(
        &mut self,
        delivery_id: Uuid,
        status: DeliveryStatus,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) {
        let id = next(&mut self.seq.delivery_update);
        self.delivery_updates.push(DeliveryUpdateEntity {
            id,
            delivery_id,
            status,
            notes,
            created_at: at,
        });
    }

    fn push_notification(&mut self, n: CreateNotificationEntity, at: DateTime<Utc>) -> NotificationEntity {
        let notification = NotificationEntity {
            id: next(&mut self.seq.notification),
            recipient_role: n.recipient_role,
            recipient_id: n.recipient_id,
            kind: n.kind,
            order_id: n.order_id,
            payload: n.payload,
            read: false,
            created_at: at,
        };
        self.notifications.push(notification.clone());
        notification
    }

    fn has_live_delivery(&self, order_id: i32) -> bool {
        self.deliveries
            .iter()
            .any(|d| d.order_id == order_id && d.status != DeliveryStatus::Cancelled)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(orders: &mut [OrderEntity]) {
    orders.sort_by(|a, b| b.ordered_at.cmp(&a.ordered_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_restaurant(&self, new: CreateRestaurantEntity) -> StoreResult<RestaurantEntity> {
        let mut t = self.tables.lock();
        let restaurant = RestaurantEntity {
            id: next(&mut t.seq.restaurant),
            owner_id: new.owner_id,
            name: new.name,
            address: new.address,
        };
        t.restaurants.insert(restaurant.id, restaurant.clone());
        Ok(restaurant)
    }

    async fn get_restaurants(&self, ids: &[i32]) -> StoreResult<Vec<RestaurantEntity>> {
        let t = self.tables.lock();
        Ok(ids.iter().filter_map(|id| t.restaurants.get(id).cloned()).collect())
    }

    async fn list_restaurants_for_owner(&self, owner_id: i32) -> StoreResult<Vec<RestaurantEntity>> {
        let t = self.tables.lock();
        Ok(t.restaurants
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn insert_driver(&self, new: CreateDriverEntity) -> StoreResult<DriverEntity> {
        let mut t = self.tables.lock();
        let now = Utc::now();
        let driver = DriverEntity {
            id: next(&mut t.seq.driver),
            approval_status: new.approval_status,
            is_available: new.is_available,
            total_deliveries: 0,
            completed_deliveries: 0,
            total_earnings_cents: 0,
            created_at: now,
            updated_at: now,
        };
        t.drivers.insert(driver.id, driver.clone());
        Ok(driver)
    }

    async fn get_driver(&self, id: i32) -> StoreResult<Option<DriverEntity>> {
        Ok(self.tables.lock().drivers.get(&id).cloned())
    }

    async fn set_driver_availability(&self, id: i32, available: bool) -> StoreResult<DriverEntity> {
        let mut t = self.tables.lock();
        let driver = t.drivers.get_mut(&id).ok_or(StoreError::NotFound)?;
        driver.is_available = available;
        driver.updated_at = Utc::now();
        Ok(driver.clone())
    }

    async fn list_dispatchable_drivers(&self) -> StoreResult<Vec<DriverEntity>> {
        let t = self.tables.lock();
        Ok(t.drivers
            .values()
            .filter(|d| d.is_dispatchable())
            .cloned()
            .collect())
    }

    async fn insert_order(
        &self,
        order: CreateOrderEntity,
        items: Vec<CreateOrderItemEntity>,
    ) -> StoreResult<OrderEntity> {
        let mut t = self.tables.lock();
        let now = Utc::now();
        let order = OrderEntity {
            id: next(&mut t.seq.order),
            customer_id: order.customer_id,
            status: order.status,
            delivery_type: order.delivery_type,
            subtotal_cents: order.subtotal_cents,
            delivery_fee_cents: order.delivery_fee_cents,
            platform_fee_cents: order.platform_fee_cents,
            total_cents: order.total_cents,
            delivery_address: order.delivery_address,
            delivery_phone: order.delivery_phone,
            special_instructions: order.special_instructions,
            cancel_reason: None,
            ordered_at: now,
            updated_at: now,
        };

        for (restaurant_id, subtotal_cents) in portion_subtotals(&items) {
            t.portions.push(OrderPortionEntity {
                order_id: order.id,
                restaurant_id,
                subtotal_cents,
                ready_at: None,
            });
        }
        for item in items {
            let id = next(&mut t.seq.order_item);
            t.order_items.push(OrderItemEntity {
                id,
                order_id: order.id,
                dish_id: item.dish_id,
                restaurant_id: item.restaurant_id,
                name: item.name,
                unit_price_cents: item.unit_price_cents,
                quantity: item.quantity,
                position: item.position,
            });
        }

        t.orders.insert(order.id, order.clone());
        t.push_outbox(order_placed_event(&order)?);
        Ok(order)
    }

    async fn get_order(&self, id: i32) -> StoreResult<Option<OrderEntity>> {
        Ok(self.tables.lock().orders.get(&id).cloned())
    }

    async fn get_order_items(&self, order_id: i32) -> StoreResult<Vec<OrderItemEntity>> {
        let t = self.tables.lock();
        let mut items: Vec<_> = t
            .order_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.position);
        Ok(items)
    }

    async fn get_order_portions(&self, order_id: i32) -> StoreResult<Vec<OrderPortionEntity>> {
        let t = self.tables.lock();
        Ok(t.portions
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn list_orders_for_customer(&self, customer_id: i32) -> StoreResult<Vec<OrderEntity>> {
        let t = self.tables.lock();
        let mut orders: Vec<_> = t
            .orders
            .values()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect();
        newest_first(&mut orders);
        Ok(orders)
    }

    async fn list_orders_for_restaurants(&self, restaurant_ids: &[i32]) -> StoreResult<Vec<OrderEntity>> {
        let t = self.tables.lock();
        let mut orders: Vec<_> = t
            .orders
            .values()
            .filter(|o| {
                t.portions
                    .iter()
                    .any(|p| p.order_id == o.id && restaurant_ids.contains(&p.restaurant_id))
            })
            .cloned()
            .collect();
        newest_first(&mut orders);
        Ok(orders)
    }

    async fn transition_order(
        &self,
        order_id: i32,
        from: &[OrderStatus],
        to: OrderStatus,
        cancel_reason: Option<String>,
        event: Option<OutboxEvent>,
    ) -> StoreResult<Cas<OrderEntity, OrderStatus>> {
        let mut t = self.tables.lock();
        let order = t.orders.get_mut(&order_id).ok_or(StoreError::NotFound)?;
        if !from.contains(&order.status) {
            return Ok(Cas::Rejected(order.status));
        }
        order.status = to;
        order.updated_at = Utc::now();
        if cancel_reason.is_some() {
            order.cancel_reason = cancel_reason;
        }
        let updated = order.clone();
        if let Some(event) = event {
            t.push_outbox(event);
        }
        Ok(Cas::Applied(updated))
    }

    async fn mark_portion_ready(
        &self,
        order_id: i32,
        restaurant_id: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<PortionProgress> {
        let mut t = self.tables.lock();
        let order_status = t.orders.get(&order_id).ok_or(StoreError::NotFound)?.status;
        let portion = t
            .portions
            .iter_mut()
            .find(|p| p.order_id == order_id && p.restaurant_id == restaurant_id)
            .ok_or(StoreError::NotFound)?;

        let newly_ready = order_status == OrderStatus::Paid && portion.ready_at.is_none();
        if newly_ready {
            portion.ready_at = Some(at);
        }
        let outstanding = t
            .portions
            .iter()
            .filter(|p| p.order_id == order_id && p.ready_at.is_none())
            .count() as i64;

        Ok(PortionProgress {
            newly_ready,
            outstanding,
            order_status,
        })
    }

    async fn delete_order(&self, order_id: i32) -> StoreResult<Cas<(), OrderStatus>> {
        let mut t = self.tables.lock();
        let status = t.orders.get(&order_id).ok_or(StoreError::NotFound)?.status;
        let in_flight = t.deliveries.iter().any(|d| {
            d.order_id == order_id
                && !matches!(d.status, DeliveryStatus::Cancelled | DeliveryStatus::Delivered)
        });
        if status.is_active() || in_flight {
            return Ok(Cas::Rejected(status));
        }

        t.orders.remove(&order_id);
        t.order_items.retain(|i| i.order_id != order_id);
        t.portions.retain(|p| p.order_id != order_id);
        let removed: Vec<Uuid> = t
            .deliveries
            .iter()
            .filter(|d| d.order_id == order_id)
            .map(|d| d.id)
            .collect();
        t.deliveries.retain(|d| d.order_id != order_id);
        t.delivery_updates.retain(|u| !removed.contains(&u.delivery_id));
        Ok(Cas::Applied(()))
    }

    async fn claim_delivery(
        &self,
        new: CreateDeliveryEntity,
        claimable: &[OrderStatus],
        event: OutboxEvent,
    ) -> StoreResult<ClaimOutcome> {
        let mut t = self.tables.lock();
        let order = t.orders.get(&new.order_id).ok_or(StoreError::NotFound)?;
        if !claimable.contains(&order.status) || order.delivery_type != DeliveryType::Delivery {
            return Ok(ClaimOutcome::NotClaimable(order.clone()));
        }
        if t.has_live_delivery(new.order_id) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let now = Utc::now();
        let delivery = DeliveryEntity {
            id: new.id,
            order_id: new.order_id,
            driver_id: new.driver_id,
            status: new.status,
            claimed_at: new.claimed_at,
            picked_up_at: None,
            delivered_at: None,
            driver_payout_cents: new.driver_payout_cents,
            payout_status: None,
            distance_miles: new.distance_miles,
            pickup_location: new.pickup_location,
            delivery_location: new.delivery_location,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        t.deliveries.push(delivery.clone());
        t.push_delivery_update(delivery.id, delivery.status, None, now);
        if let Some(driver) = delivery.driver_id.and_then(|id| t.drivers.get_mut(&id)) {
            driver.total_deliveries += 1;
            driver.updated_at = now;
        }
        t.push_outbox(event);
        Ok(ClaimOutcome::Claimed(delivery))
    }

    async fn get_delivery(&self, id: Uuid) -> StoreResult<Option<DeliveryEntity>> {
        let t = self.tables.lock();
        Ok(t.deliveries.iter().find(|d| d.id == id).cloned())
    }

    async fn get_active_delivery_for_order(&self, order_id: i32) -> StoreResult<Option<DeliveryEntity>> {
        let t = self.tables.lock();
        Ok(t.deliveries
            .iter()
            .find(|d| d.order_id == order_id && d.status != DeliveryStatus::Cancelled)
            .cloned())
    }

    async fn list_deliveries_for_driver(&self, driver_id: i32) -> StoreResult<Vec<DeliveryEntity>> {
        let t = self.tables.lock();
        let mut deliveries: Vec<_> = t
            .deliveries
            .iter()
            .filter(|d| d.driver_id == Some(driver_id))
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deliveries)
    }

    async fn list_delivery_updates(&self, delivery_id: Uuid) -> StoreResult<Vec<DeliveryUpdateEntity>> {
        let t = self.tables.lock();
        Ok(t.delivery_updates
            .iter()
            .filter(|u| u.delivery_id == delivery_id)
            .cloned()
            .collect())
    }

    async fn advance_delivery(
        &self,
        advance: DeliveryAdvance,
    ) -> StoreResult<Cas<DeliveryEntity, DeliveryStatus>> {
        let mut t = self.tables.lock();
        let delivery = t
            .deliveries
            .iter_mut()
            .find(|d| d.id == advance.delivery_id)
            .ok_or(StoreError::NotFound)?;
        if delivery.status != advance.from || delivery.driver_id != Some(advance.driver_id) {
            return Ok(Cas::Rejected(delivery.status));
        }

        delivery.status = advance.to;
        delivery.updated_at = advance.at;
        if advance.notes.is_some() {
            delivery.notes = advance.notes.clone();
        }
        match advance.to {
            DeliveryStatus::PickedUp => delivery.picked_up_at = Some(advance.at),
            DeliveryStatus::Delivered => {
                delivery.delivered_at = Some(advance.at);
                delivery.payout_status = Some(PayoutStatus::Pending);
            }
            _ => {}
        }
        let updated = delivery.clone();

        if advance.to == DeliveryStatus::Delivered
            && let Some(driver) = t.drivers.get_mut(&advance.driver_id)
        {
            driver.completed_deliveries += 1;
            driver.total_earnings_cents += updated.driver_payout_cents;
            driver.updated_at = advance.at;
        }
        if advance.to == DeliveryStatus::Delivered
            && let Some(order) = t
                .orders
                .get_mut(&updated.order_id)
                .filter(|o| o.status == OrderStatus::Completed)
        {
            let event = order_delivered_event(&updated, advance.driver_id)?;
            order.status = OrderStatus::Delivered;
            order.updated_at = advance.at;
            t.push_outbox(event);
        }
        t.push_delivery_update(updated.id, advance.to, advance.notes, advance.at);
        Ok(Cas::Applied(updated))
    }

    async fn cancel_delivery_for_order(&self, order_id: i32) -> StoreResult<Option<DeliveryEntity>> {
        let mut t = self.tables.lock();
        let now = Utc::now();
        let Some(delivery) = t
            .deliveries
            .iter_mut()
            .find(|d| d.order_id == order_id && d.status == DeliveryStatus::Claimed)
        else {
            return Ok(None);
        };
        delivery.status = DeliveryStatus::Cancelled;
        delivery.updated_at = now;
        let cancelled = delivery.clone();
        t.push_delivery_update(cancelled.id, DeliveryStatus::Cancelled, None, now);
        Ok(Some(cancelled))
    }

    async fn list_available_orders(&self, claimable: &[OrderStatus]) -> StoreResult<Vec<OrderEntity>> {
        let t = self.tables.lock();
        Ok(t.orders
            .values()
            .filter(|o| {
                claimable.contains(&o.status)
                    && o.delivery_type == DeliveryType::Delivery
                    && !t.has_live_delivery(o.id)
            })
            .cloned()
            .collect())
    }

    async fn insert_notifications(
        &self,
        new: Vec<CreateNotificationEntity>,
    ) -> StoreResult<Vec<NotificationEntity>> {
        let mut t = self.tables.lock();
        let now = Utc::now();
        Ok(new
            .into_iter()
            .map(|n| t.push_notification(n, now))
            .collect())
    }

    async fn get_notification(&self, id: i32) -> StoreResult<Option<NotificationEntity>> {
        let t = self.tables.lock();
        Ok(t.notifications.iter().find(|n| n.id == id).cloned())
    }

    async fn list_notifications(
        &self,
        recipient: Recipient,
        limit: i64,
    ) -> StoreResult<Vec<NotificationEntity>> {
        let t = self.tables.lock();
        let mut found: Vec<_> = t
            .notifications
            .iter()
            .filter(|n| n.recipient() == recipient)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn count_unread(&self, recipient: Recipient) -> StoreResult<i64> {
        let t = self.tables.lock();
        Ok(t.notifications
            .iter()
            .filter(|n| n.recipient() == recipient && !n.read)
            .count() as i64)
    }

    async fn mark_read(&self, id: i32, recipient: Recipient) -> StoreResult<Option<NotificationEntity>> {
        let mut t = self.tables.lock();
        Ok(t.notifications
            .iter_mut()
            .find(|n| n.id == id && n.recipient() == recipient)
            .map(|n| {
                n.read = true;
                n.clone()
            }))
    }

    async fn mark_all_read(&self, recipient: Recipient) -> StoreResult<usize> {
        let mut t = self.tables.lock();
        let mut updated = 0;
        for n in t
            .notifications
            .iter_mut()
            .filter(|n| n.recipient() == recipient && !n.read)
        {
            n.read = true;
            updated += 1;
        }
        Ok(updated)
    }

    async fn list_refund_requests(&self, order_id: i32) -> StoreResult<Vec<NotificationEntity>> {
        let t = self.tables.lock();
        Ok(t.notifications
            .iter()
            .filter(|n| n.order_id == Some(order_id) && n.kind == NotificationKind::RefundRequest)
            .cloned()
            .collect())
    }

    async fn open_refund_requests(
        &self,
        order_id: i32,
        requests: Vec<CreateNotificationEntity>,
    ) -> StoreResult<Vec<NotificationEntity>> {
        let mut t = self.tables.lock();
        if !t.orders.contains_key(&order_id) {
            return Err(StoreError::NotFound);
        }
        let opened: Vec<serde_json::Value> = t
            .notifications
            .iter()
            .filter(|n| n.order_id == Some(order_id) && n.kind == NotificationKind::RefundRequest)
            .map(|n| n.payload.clone())
            .collect();

        let now = Utc::now();
        Ok(unopened_refunds(&opened, requests)
            .into_iter()
            .map(|n| t.push_notification(n, now))
            .collect())
    }

    async fn resolve_refund(
        &self,
        resolution: RefundResolution,
        event: OutboxEvent,
    ) -> StoreResult<Cas<NotificationEntity, RefundRequestPayload>> {
        let mut t = self.tables.lock();
        let notification = t
            .notifications
            .iter_mut()
            .find(|n| n.id == resolution.notification_id)
            .ok_or(StoreError::NotFound)?;
        let current = notification.refund_request().ok_or_else(|| {
            StoreError::Malformed(format!(
                "notification #{} is not a refund request",
                notification.id
            ))
        })?;
        if current.status != RefundStatus::Pending {
            return Ok(Cas::Rejected(current));
        }

        notification.payload = serde_json::to_value(&resolution.resolved)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let updated = notification.clone();
        t.push_outbox(event);
        Ok(Cas::Applied(updated))
    }

    async fn record_refund_audit(
        &self,
        notification_id: i32,
        payload: RefundRequestPayload,
    ) -> StoreResult<NotificationEntity> {
        let mut t = self.tables.lock();
        let notification = t
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id)
            .ok_or(StoreError::NotFound)?;
        notification.payload =
            serde_json::to_value(&payload).map_err(|e| StoreError::Malformed(e.to_string()))?;
        Ok(notification.clone())
    }

    async fn fetch_pending_outbox(&self, limit: i64) -> StoreResult<Vec<OutboxEntity>> {
        let t = self.tables.lock();
        Ok(t.outbox
            .iter()
            .filter(|e| e.status == STATUS_PENDING)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_outbox_published(&self, ids: &[i32]) -> StoreResult<()> {
        let mut t = self.tables.lock();
        let now = Utc::now();
        for event in t.outbox.iter_mut().filter(|e| ids.contains(&e.id)) {
            event.status = STATUS_PUBLISHED.into();
            event.updated_at = now;
        }
        Ok(())
    }

    async fn stats(&self) -> StoreResult<PlatformStats> {
        let t = self.tables.lock();
        let orders = OrderStatus::ALL
            .iter()
            .map(|s| StatusCount {
                status: s.to_string(),
                count: t.orders.values().filter(|o| o.status == *s).count() as i64,
            })
            .collect();
        let deliveries = DeliveryStatus::ALL
            .iter()
            .filter(|s| **s != DeliveryStatus::Unclaimed)
            .map(|s| StatusCount {
                status: s.to_string(),
                count: t.deliveries.iter().filter(|d| d.status == *s).count() as i64,
            })
            .collect();

        let refund_statuses: Vec<RefundStatus> = t
            .notifications
            .iter()
            .filter_map(|n| n.refund_request())
            .map(|r| r.status)
            .collect();
        let refunds = super::refund_counts(&refund_statuses);

        Ok(PlatformStats {
            orders,
            deliveries,
            refunds,
        })
    }
}
