//! PostgreSQL store on diesel-async.
//!
//! Claims rely on `deliveries_active_order_idx`, a partial unique index on
//! `deliveries (order_id) WHERE status <> 'cancelled'`, plus a row lock on the
//! order so the loser of a race sees the winner's delivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
    dsl::{count_star, exists, not},
    result::{DatabaseErrorKind, Error as DieselError},
};
use diesel_async::{
    AsyncConnection, AsyncPgConnection, RunQueryDsl,
    pooled_connection::bb8::PooledConnection,
};
use uuid::Uuid;

use super::{
    Cas, ClaimOutcome, DeliveryAdvance, PlatformStats, PortionProgress, RefundResolution,
    StatusCount, Store, StoreError, StoreResult, order_delivered_event, order_placed_event,
    portion_subtotals, refund_counts, unopened_refunds,
};
use crate::{
    db::DbPool,
    models::{
        ApprovalStatus, CreateDeliveryEntity, CreateDeliveryUpdateEntity, CreateDriverEntity,
        CreateNotificationEntity, CreateOrderEntity, CreateOrderItemEntity,
        CreateOrderPortionEntity, CreateRestaurantEntity, DeliveryEntity, DeliveryStatus,
        DeliveryType, DeliveryUpdateEntity, DriverEntity, NotificationEntity, NotificationKind,
        OrderEntity, OrderItemEntity, OrderPortionEntity, OrderStatus, OutboxEntity,
        PayoutStatus, Recipient, RefundRequestPayload, RefundStatus, RestaurantEntity,
    },
    outbox::{self, OutboxEvent, STATUS_PENDING, STATUS_PUBLISHED},
    schema::{
        deliveries, delivery_updates, drivers, notifications, order_items, order_portions,
        orders, outbox as outbox_table, restaurants,
    },
};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<PooledConnection<'_, AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

fn is_unique_violation(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Database(DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            _
        ))
    )
}

fn to_payload(payload: &RefundRequestPayload) -> StoreResult<serde_json::Value> {
    serde_json::to_value(payload).map_err(|e| StoreError::Malformed(e.to_string()))
}

fn fill_counts<S: ToString + PartialEq + Copy>(all: &[S], found: &[(S, i64)]) -> Vec<StatusCount> {
    all.iter()
        .map(|status| StatusCount {
            status: status.to_string(),
            count: found
                .iter()
                .find(|(s, _)| s == status)
                .map(|(_, c)| *c)
                .unwrap_or(0),
        })
        .collect()
}

#[async_trait]
impl Store for PgStore {
    async fn insert_restaurant(&self, new: CreateRestaurantEntity) -> StoreResult<RestaurantEntity> {
        let conn = &mut self.conn().await?;
        Ok(diesel::insert_into(restaurants::table)
            .values(&new)
            .returning(RestaurantEntity::as_returning())
            .get_result(conn)
            .await?)
    }

    async fn get_restaurants(&self, ids: &[i32]) -> StoreResult<Vec<RestaurantEntity>> {
        let conn = &mut self.conn().await?;
        Ok(restaurants::table
            .filter(restaurants::id.eq_any(ids))
            .select(RestaurantEntity::as_select())
            .order_by(restaurants::id.asc())
            .load(conn)
            .await?)
    }

    async fn list_restaurants_for_owner(&self, owner_id: i32) -> StoreResult<Vec<RestaurantEntity>> {
        let conn = &mut self.conn().await?;
        Ok(restaurants::table
            .filter(restaurants::owner_id.eq(owner_id))
            .select(RestaurantEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn insert_driver(&self, new: CreateDriverEntity) -> StoreResult<DriverEntity> {
        let conn = &mut self.conn().await?;
        Ok(diesel::insert_into(drivers::table)
            .values(&new)
            .returning(DriverEntity::as_returning())
            .get_result(conn)
            .await?)
    }

    async fn get_driver(&self, id: i32) -> StoreResult<Option<DriverEntity>> {
        let conn = &mut self.conn().await?;
        Ok(drivers::table
            .find(id)
            .select(DriverEntity::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn set_driver_availability(&self, id: i32, available: bool) -> StoreResult<DriverEntity> {
        let conn = &mut self.conn().await?;
        diesel::update(drivers::table.find(id))
            .set((
                drivers::is_available.eq(available),
                drivers::updated_at.eq(Utc::now()),
            ))
            .returning(DriverEntity::as_returning())
            .get_result(conn)
            .await
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    async fn list_dispatchable_drivers(&self) -> StoreResult<Vec<DriverEntity>> {
        let conn = &mut self.conn().await?;
        Ok(drivers::table
            .filter(drivers::approval_status.eq(ApprovalStatus::Approved))
            .filter(drivers::is_available.eq(true))
            .select(DriverEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn insert_order(
        &self,
        order: CreateOrderEntity,
        items: Vec<CreateOrderItemEntity>,
    ) -> StoreResult<OrderEntity> {
        let conn = &mut self.conn().await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                let order = diesel::insert_into(orders::table)
                    .values(&order)
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await?;

                let portions: Vec<CreateOrderPortionEntity> = portion_subtotals(&items)
                    .into_iter()
                    .map(|(restaurant_id, subtotal_cents)| CreateOrderPortionEntity {
                        order_id: order.id,
                        restaurant_id,
                        subtotal_cents,
                    })
                    .collect();
                let items: Vec<CreateOrderItemEntity> = items
                    .into_iter()
                    .map(|item| CreateOrderItemEntity {
                        order_id: order.id,
                        ..item
                    })
                    .collect();

                diesel::insert_into(order_items::table)
                    .values(&items)
                    .execute(conn)
                    .await?;
                diesel::insert_into(order_portions::table)
                    .values(&portions)
                    .execute(conn)
                    .await?;
                outbox::publish(conn, order_placed_event(&order)?).await?;

                Ok::<OrderEntity, StoreError>(order)
            })
        })
        .await
    }

    async fn get_order(&self, id: i32) -> StoreResult<Option<OrderEntity>> {
        let conn = &mut self.conn().await?;
        Ok(orders::table
            .find(id)
            .select(OrderEntity::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn get_order_items(&self, order_id: i32) -> StoreResult<Vec<OrderItemEntity>> {
        let conn = &mut self.conn().await?;
        Ok(order_items::table
            .filter(order_items::order_id.eq(order_id))
            .order_by(order_items::position.asc())
            .select(OrderItemEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn get_order_portions(&self, order_id: i32) -> StoreResult<Vec<OrderPortionEntity>> {
        let conn = &mut self.conn().await?;
        Ok(order_portions::table
            .filter(order_portions::order_id.eq(order_id))
            .order_by(order_portions::restaurant_id.asc())
            .select(OrderPortionEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn list_orders_for_customer(&self, customer_id: i32) -> StoreResult<Vec<OrderEntity>> {
        let conn = &mut self.conn().await?;
        Ok(orders::table
            .filter(orders::customer_id.eq(customer_id))
            .order_by((orders::ordered_at.desc(), orders::id.desc()))
            .select(OrderEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn list_orders_for_restaurants(&self, restaurant_ids: &[i32]) -> StoreResult<Vec<OrderEntity>> {
        let conn = &mut self.conn().await?;
        let order_ids = order_portions::table
            .filter(order_portions::restaurant_id.eq_any(restaurant_ids.to_vec()))
            .select(order_portions::order_id);
        Ok(orders::table
            .filter(orders::id.eq_any(order_ids))
            .order_by((orders::ordered_at.desc(), orders::id.desc()))
            .select(OrderEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn transition_order(
        &self,
        order_id: i32,
        from: &[OrderStatus],
        to: OrderStatus,
        cancel_reason: Option<String>,
        event: Option<OutboxEvent>,
    ) -> StoreResult<Cas<OrderEntity, OrderStatus>> {
        let conn = &mut self.conn().await?;
        let from = from.to_vec();
        conn.transaction(move |conn| {
            Box::pin(async move {
                let updated: Option<OrderEntity> = diesel::update(
                    orders::table
                        .find(order_id)
                        .filter(orders::status.eq_any(from)),
                )
                .set((orders::status.eq(to), orders::updated_at.eq(Utc::now())))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await
                .optional()?;

                let Some(mut order) = updated else {
                    let current: Option<OrderStatus> = orders::table
                        .find(order_id)
                        .select(orders::status)
                        .first(conn)
                        .await
                        .optional()?;
                    return match current {
                        Some(status) => Ok(Cas::Rejected(status)),
                        None => Err(StoreError::NotFound),
                    };
                };

                if let Some(reason) = cancel_reason {
                    order = diesel::update(orders::table.find(order_id))
                        .set(orders::cancel_reason.eq(reason))
                        .returning(OrderEntity::as_returning())
                        .get_result(conn)
                        .await?;
                }
                if let Some(event) = event {
                    outbox::publish(conn, event).await?;
                }

                Ok::<_, StoreError>(Cas::Applied(order))
            })
        })
        .await
    }

    async fn mark_portion_ready(
        &self,
        order_id: i32,
        restaurant_id: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<PortionProgress> {
        let conn = &mut self.conn().await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                let order_status: OrderStatus = orders::table
                    .find(order_id)
                    .select(orders::status)
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or(StoreError::NotFound)?;

                let marked = if order_status == OrderStatus::Paid {
                    diesel::update(
                        order_portions::table
                            .find((order_id, restaurant_id))
                            .filter(order_portions::ready_at.is_null()),
                    )
                    .set(order_portions::ready_at.eq(at))
                    .execute(conn)
                    .await?
                } else {
                    0
                };

                if marked == 0 {
                    let found: i64 = order_portions::table
                        .find((order_id, restaurant_id))
                        .count()
                        .get_result(conn)
                        .await?;
                    if found == 0 {
                        return Err(StoreError::NotFound);
                    }
                }

                let outstanding: i64 = order_portions::table
                    .filter(order_portions::order_id.eq(order_id))
                    .filter(order_portions::ready_at.is_null())
                    .count()
                    .get_result(conn)
                    .await?;

                Ok::<_, StoreError>(PortionProgress {
                    newly_ready: marked > 0,
                    outstanding,
                    order_status,
                })
            })
        })
        .await
    }

    async fn delete_order(&self, order_id: i32) -> StoreResult<Cas<(), OrderStatus>> {
        let conn = &mut self.conn().await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                let status: OrderStatus = orders::table
                    .find(order_id)
                    .select(orders::status)
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or(StoreError::NotFound)?;
                let in_flight: bool = diesel::select(exists(
                    deliveries::table
                        .filter(deliveries::order_id.eq(order_id))
                        .filter(
                            deliveries::status
                                .ne_all([DeliveryStatus::Cancelled, DeliveryStatus::Delivered]),
                        ),
                ))
                .get_result(conn)
                .await?;
                if status.is_active() || in_flight {
                    return Ok(Cas::Rejected(status));
                }

                diesel::delete(orders::table.find(order_id))
                    .execute(conn)
                    .await?;
                Ok::<_, StoreError>(Cas::Applied(()))
            })
        })
        .await
    }

    async fn claim_delivery(
        &self,
        new: CreateDeliveryEntity,
        claimable: &[OrderStatus],
        event: OutboxEvent,
    ) -> StoreResult<ClaimOutcome> {
        let conn = &mut self.conn().await?;
        let claimable = claimable.to_vec();
        let result = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    let order: OrderEntity = orders::table
                        .find(new.order_id)
                        .select(OrderEntity::as_select())
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?
                        .ok_or(StoreError::NotFound)?;
                    if !claimable.contains(&order.status)
                        || order.delivery_type != DeliveryType::Delivery
                    {
                        return Ok(ClaimOutcome::NotClaimable(order));
                    }

                    let taken: bool = diesel::select(exists(
                        deliveries::table
                            .filter(deliveries::order_id.eq(new.order_id))
                            .filter(deliveries::status.ne(DeliveryStatus::Cancelled)),
                    ))
                    .get_result(conn)
                    .await?;
                    if taken {
                        return Ok(ClaimOutcome::AlreadyClaimed);
                    }

                    let delivery = diesel::insert_into(deliveries::table)
                        .values(&new)
                        .returning(DeliveryEntity::as_returning())
                        .get_result(conn)
                        .await?;
                    diesel::insert_into(delivery_updates::table)
                        .values(CreateDeliveryUpdateEntity {
                            delivery_id: delivery.id,
                            status: delivery.status,
                            notes: None,
                        })
                        .execute(conn)
                        .await?;
                    if let Some(driver_id) = delivery.driver_id {
                        diesel::update(drivers::table.find(driver_id))
                            .set((
                                drivers::total_deliveries.eq(drivers::total_deliveries + 1),
                                drivers::updated_at.eq(Utc::now()),
                            ))
                            .execute(conn)
                            .await?;
                    }
                    outbox::publish(conn, event).await?;

                    Ok::<_, StoreError>(ClaimOutcome::Claimed(delivery))
                })
            })
            .await;

        match result {
            Err(err) if is_unique_violation(&err) => Ok(ClaimOutcome::AlreadyClaimed),
            other => other,
        }
    }

    async fn get_delivery(&self, id: Uuid) -> StoreResult<Option<DeliveryEntity>> {
        let conn = &mut self.conn().await?;
        Ok(deliveries::table
            .find(id)
            .select(DeliveryEntity::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn get_active_delivery_for_order(&self, order_id: i32) -> StoreResult<Option<DeliveryEntity>> {
        let conn = &mut self.conn().await?;
        Ok(deliveries::table
            .filter(deliveries::order_id.eq(order_id))
            .filter(deliveries::status.ne(DeliveryStatus::Cancelled))
            .select(DeliveryEntity::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn list_deliveries_for_driver(&self, driver_id: i32) -> StoreResult<Vec<DeliveryEntity>> {
        let conn = &mut self.conn().await?;
        Ok(deliveries::table
            .filter(deliveries::driver_id.eq(driver_id))
            .order_by(deliveries::created_at.desc())
            .select(DeliveryEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn list_delivery_updates(&self, delivery_id: Uuid) -> StoreResult<Vec<DeliveryUpdateEntity>> {
        let conn = &mut self.conn().await?;
        Ok(delivery_updates::table
            .filter(delivery_updates::delivery_id.eq(delivery_id))
            .order_by(delivery_updates::id.asc())
            .select(DeliveryUpdateEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn advance_delivery(
        &self,
        advance: DeliveryAdvance,
    ) -> StoreResult<Cas<DeliveryEntity, DeliveryStatus>> {
        let conn = &mut self.conn().await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                let DeliveryAdvance {
                    delivery_id,
                    driver_id,
                    from,
                    to,
                    notes,
                    at,
                } = advance;

                let moved = diesel::update(
                    deliveries::table
                        .find(delivery_id)
                        .filter(deliveries::status.eq(from))
                        .filter(deliveries::driver_id.eq(driver_id)),
                )
                .set((deliveries::status.eq(to), deliveries::updated_at.eq(at)))
                .execute(conn)
                .await?;

                if moved == 0 {
                    let current: Option<DeliveryStatus> = deliveries::table
                        .find(delivery_id)
                        .select(deliveries::status)
                        .first(conn)
                        .await
                        .optional()?;
                    return match current {
                        Some(status) => Ok(Cas::Rejected(status)),
                        None => Err(StoreError::NotFound),
                    };
                }

                match to {
                    DeliveryStatus::PickedUp => {
                        diesel::update(deliveries::table.find(delivery_id))
                            .set(deliveries::picked_up_at.eq(at))
                            .execute(conn)
                            .await?;
                    }
                    DeliveryStatus::Delivered => {
                        diesel::update(deliveries::table.find(delivery_id))
                            .set((
                                deliveries::delivered_at.eq(at),
                                deliveries::payout_status.eq(PayoutStatus::Pending),
                            ))
                            .execute(conn)
                            .await?;
                    }
                    _ => {}
                }
                if let Some(notes) = notes.clone() {
                    diesel::update(deliveries::table.find(delivery_id))
                        .set(deliveries::notes.eq(notes))
                        .execute(conn)
                        .await?;
                }

                let delivery: DeliveryEntity = deliveries::table
                    .find(delivery_id)
                    .select(DeliveryEntity::as_select())
                    .first(conn)
                    .await?;

                if to == DeliveryStatus::Delivered {
                    diesel::update(drivers::table.find(driver_id))
                        .set((
                            drivers::completed_deliveries.eq(drivers::completed_deliveries + 1),
                            drivers::total_earnings_cents
                                .eq(drivers::total_earnings_cents + delivery.driver_payout_cents),
                            drivers::updated_at.eq(at),
                        ))
                        .execute(conn)
                        .await?;

                    let moved_order = diesel::update(
                        orders::table
                            .find(delivery.order_id)
                            .filter(orders::status.eq(OrderStatus::Completed)),
                    )
                    .set((
                        orders::status.eq(OrderStatus::Delivered),
                        orders::updated_at.eq(at),
                    ))
                    .execute(conn)
                    .await?;
                    if moved_order > 0 {
                        outbox::publish(conn, order_delivered_event(&delivery, driver_id)?).await?;
                    }
                }
                diesel::insert_into(delivery_updates::table)
                    .values(CreateDeliveryUpdateEntity {
                        delivery_id,
                        status: to,
                        notes,
                    })
                    .execute(conn)
                    .await?;

                Ok::<_, StoreError>(Cas::Applied(delivery))
            })
        })
        .await
    }

    async fn cancel_delivery_for_order(&self, order_id: i32) -> StoreResult<Option<DeliveryEntity>> {
        let conn = &mut self.conn().await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                let cancelled: Option<DeliveryEntity> = diesel::update(
                    deliveries::table
                        .filter(deliveries::order_id.eq(order_id))
                        .filter(deliveries::status.eq(DeliveryStatus::Claimed)),
                )
                .set((
                    deliveries::status.eq(DeliveryStatus::Cancelled),
                    deliveries::updated_at.eq(Utc::now()),
                ))
                .returning(DeliveryEntity::as_returning())
                .get_result(conn)
                .await
                .optional()?;

                if let Some(delivery) = &cancelled {
                    diesel::insert_into(delivery_updates::table)
                        .values(CreateDeliveryUpdateEntity {
                            delivery_id: delivery.id,
                            status: DeliveryStatus::Cancelled,
                            notes: None,
                        })
                        .execute(conn)
                        .await?;
                }
                Ok::<_, StoreError>(cancelled)
            })
        })
        .await
    }

    async fn list_available_orders(&self, claimable: &[OrderStatus]) -> StoreResult<Vec<OrderEntity>> {
        let conn = &mut self.conn().await?;
        Ok(orders::table
            .filter(orders::status.eq_any(claimable.to_vec()))
            .filter(orders::delivery_type.eq(DeliveryType::Delivery))
            .filter(not(exists(
                deliveries::table
                    .filter(deliveries::order_id.eq(orders::id))
                    .filter(deliveries::status.ne(DeliveryStatus::Cancelled)),
            )))
            .order_by(orders::ordered_at.asc())
            .select(OrderEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn insert_notifications(
        &self,
        new: Vec<CreateNotificationEntity>,
    ) -> StoreResult<Vec<NotificationEntity>> {
        if new.is_empty() {
            return Ok(Vec::new());
        }
        let conn = &mut self.conn().await?;
        Ok(diesel::insert_into(notifications::table)
            .values(&new)
            .returning(NotificationEntity::as_returning())
            .get_results(conn)
            .await?)
    }

    async fn get_notification(&self, id: i32) -> StoreResult<Option<NotificationEntity>> {
        let conn = &mut self.conn().await?;
        Ok(notifications::table
            .find(id)
            .select(NotificationEntity::as_select())
            .first(conn)
            .await
            .optional()?)
    }

    async fn list_notifications(
        &self,
        recipient: Recipient,
        limit: i64,
    ) -> StoreResult<Vec<NotificationEntity>> {
        let conn = &mut self.conn().await?;
        Ok(notifications::table
            .filter(notifications::recipient_role.eq(recipient.role))
            .filter(notifications::recipient_id.eq(recipient.id))
            .order_by((notifications::created_at.desc(), notifications::id.desc()))
            .limit(limit)
            .select(NotificationEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn count_unread(&self, recipient: Recipient) -> StoreResult<i64> {
        let conn = &mut self.conn().await?;
        Ok(notifications::table
            .filter(notifications::recipient_role.eq(recipient.role))
            .filter(notifications::recipient_id.eq(recipient.id))
            .filter(notifications::read.eq(false))
            .count()
            .get_result(conn)
            .await?)
    }

    async fn mark_read(&self, id: i32, recipient: Recipient) -> StoreResult<Option<NotificationEntity>> {
        let conn = &mut self.conn().await?;
        Ok(diesel::update(
            notifications::table
                .find(id)
                .filter(notifications::recipient_role.eq(recipient.role))
                .filter(notifications::recipient_id.eq(recipient.id)),
        )
        .set(notifications::read.eq(true))
        .returning(NotificationEntity::as_returning())
        .get_result(conn)
        .await
        .optional()?)
    }

    async fn mark_all_read(&self, recipient: Recipient) -> StoreResult<usize> {
        let conn = &mut self.conn().await?;
        Ok(diesel::update(
            notifications::table
                .filter(notifications::recipient_role.eq(recipient.role))
                .filter(notifications::recipient_id.eq(recipient.id))
                .filter(notifications::read.eq(false)),
        )
        .set(notifications::read.eq(true))
        .execute(conn)
        .await?)
    }

    async fn list_refund_requests(&self, order_id: i32) -> StoreResult<Vec<NotificationEntity>> {
        let conn = &mut self.conn().await?;
        Ok(notifications::table
            .filter(notifications::order_id.eq(order_id))
            .filter(notifications::kind.eq(NotificationKind::RefundRequest))
            .order_by(notifications::id.asc())
            .select(NotificationEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn open_refund_requests(
        &self,
        order_id: i32,
        requests: Vec<CreateNotificationEntity>,
    ) -> StoreResult<Vec<NotificationEntity>> {
        let conn = &mut self.conn().await?;
        let result = conn
            .transaction(move |conn| {
                Box::pin(async move {
                    orders::table
                        .find(order_id)
                        .select(orders::id)
                        .for_update()
                        .first::<i32>(conn)
                        .await
                        .optional()?
                        .ok_or(StoreError::NotFound)?;

                    let opened: Vec<serde_json::Value> = notifications::table
                        .filter(notifications::order_id.eq(order_id))
                        .filter(notifications::kind.eq(NotificationKind::RefundRequest))
                        .select(notifications::payload)
                        .load(conn)
                        .await?;
                    let fresh = unopened_refunds(&opened, requests);
                    if fresh.is_empty() {
                        return Ok(Vec::new());
                    }

                    Ok::<_, StoreError>(
                        diesel::insert_into(notifications::table)
                            .values(&fresh)
                            .returning(NotificationEntity::as_returning())
                            .get_results(conn)
                            .await?,
                    )
                })
            })
            .await;

        match result {
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate(format!(
                "a refund request for order #{order_id} already exists"
            ))),
            other => other,
        }
    }

    async fn resolve_refund(
        &self,
        resolution: RefundResolution,
        event: OutboxEvent,
    ) -> StoreResult<Cas<NotificationEntity, RefundRequestPayload>> {
        let conn = &mut self.conn().await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                let notification: NotificationEntity = notifications::table
                    .find(resolution.notification_id)
                    .select(NotificationEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
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

                let updated = diesel::update(notifications::table.find(notification.id))
                    .set(notifications::payload.eq(to_payload(&resolution.resolved)?))
                    .returning(NotificationEntity::as_returning())
                    .get_result(conn)
                    .await?;
                outbox::publish(conn, event).await?;

                Ok::<_, StoreError>(Cas::Applied(updated))
            })
        })
        .await
    }

    async fn record_refund_audit(
        &self,
        notification_id: i32,
        payload: RefundRequestPayload,
    ) -> StoreResult<NotificationEntity> {
        let conn = &mut self.conn().await?;
        diesel::update(notifications::table.find(notification_id))
            .set(notifications::payload.eq(to_payload(&payload)?))
            .returning(NotificationEntity::as_returning())
            .get_result(conn)
            .await
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    async fn fetch_pending_outbox(&self, limit: i64) -> StoreResult<Vec<OutboxEntity>> {
        let conn = &mut self.conn().await?;
        Ok(outbox_table::table
            .filter(outbox_table::status.eq(STATUS_PENDING))
            .order_by(outbox_table::id.asc())
            .limit(limit)
            .select(OutboxEntity::as_select())
            .load(conn)
            .await?)
    }

    async fn mark_outbox_published(&self, ids: &[i32]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = &mut self.conn().await?;
        diesel::update(outbox_table::table.filter(outbox_table::id.eq_any(ids.to_vec())))
            .set((
                outbox_table::status.eq(STATUS_PUBLISHED),
                outbox_table::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn stats(&self) -> StoreResult<PlatformStats> {
        let conn = &mut self.conn().await?;
        let order_counts: Vec<(OrderStatus, i64)> = orders::table
            .group_by(orders::status)
            .select((orders::status, count_star()))
            .load(conn)
            .await?;
        let delivery_counts: Vec<(DeliveryStatus, i64)> = deliveries::table
            .group_by(deliveries::status)
            .select((deliveries::status, count_star()))
            .load(conn)
            .await?;
        let refund_payloads: Vec<NotificationEntity> = notifications::table
            .filter(notifications::kind.eq(NotificationKind::RefundRequest))
            .select(NotificationEntity::as_select())
            .load(conn)
            .await?;

        let delivery_statuses: Vec<DeliveryStatus> = DeliveryStatus::ALL
            .iter()
            .copied()
            .filter(|s| *s != DeliveryStatus::Unclaimed)
            .collect();
        let refund_statuses: Vec<_> = refund_payloads
            .iter()
            .filter_map(|n| n.refund_request())
            .map(|r| r.status)
            .collect();

        Ok(PlatformStats {
            orders: fill_counts(OrderStatus::ALL, &order_counts),
            deliveries: fill_counts(&delivery_statuses, &delivery_counts),
            refunds: refund_counts(&refund_statuses),
        })
    }
}
