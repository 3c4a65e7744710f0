mod common;

use std::sync::Arc;

use common::{Fixture, driver};
use foodhub_orderservice::{
    app_error::AppError,
    models::{ApprovalStatus, DeliveryStatus, DeliveryType, NotificationKind, Recipient},
    services::{claims, deliveries, dispatch, notifications, orders},
    store::Store,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_have_exactly_one_winner() {
    let fx = Arc::new(Fixture::new());
    let a = fx.restaurant(10, "A").await;
    let order = fx.place(1, DeliveryType::Delivery, &[(a.id, 1_500, 1)]).await;
    fx.pay(&order).await;

    let mut drivers = Vec::new();
    for _ in 0..8 {
        drivers.push(fx.online_driver().await);
    }

    let handles: Vec<_> = drivers
        .iter()
        .map(|d| {
            let fx = fx.clone();
            let driver_id = d.id;
            let order_id = order.id;
            tokio::spawn(async move {
                claims::claim_order(&fx.state, driver_id, order_id, None).await
            })
        })
        .collect();

    let mut won = 0;
    let mut lost = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(AppError::AlreadyClaimed(id)) => {
                assert_eq!(id, order.id);
                lost += 1;
            }
            Err(other) => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(lost, drivers.len() - 1);

    let live = fx
        .store
        .get_active_delivery_for_order(order.id)
        .await
        .unwrap()
        .unwrap();
    let claimed_by_anyone: usize = {
        let mut total = 0;
        for d in &drivers {
            total += fx.store.list_deliveries_for_driver(d.id).await.unwrap().len();
        }
        total
    };
    assert_eq!(claimed_by_anyone, 1);
    assert_eq!(live.status, DeliveryStatus::Claimed);
}

#[tokio::test]
async fn two_drivers_one_delivery() {
    let fx = Fixture::new();
    let a = fx.restaurant(10, "A").await;
    let d1 = fx.online_driver().await;
    let d2 = fx.online_driver().await;
    let order = fx.place(1, DeliveryType::Delivery, &[(a.id, 1_000, 1)]).await;
    fx.pay(&order).await;

    let (r1, r2) = tokio::join!(
        claims::claim_order(&fx.state, d1.id, order.id, None),
        claims::claim_order(&fx.state, d2.id, order.id, None),
    );

    assert!(r1.is_ok() != r2.is_ok());
    let loser = if r1.is_ok() { r2 } else { r1 };
    assert!(matches!(loser, Err(AppError::AlreadyClaimed(_))));
}

#[tokio::test]
async fn only_approved_online_drivers_can_claim() {
    let fx = Fixture::new();
    let a = fx.restaurant(10, "A").await;
    let pending = fx.driver(ApprovalStatus::Pending, true).await;
    let offline = fx.driver(ApprovalStatus::Approved, false).await;
    let order = fx.place(1, DeliveryType::Delivery, &[(a.id, 1_000, 1)]).await;
    fx.pay(&order).await;

    for driver_id in [pending.id, offline.id, 999] {
        let err = claims::claim_order(&fx.state, driver_id, order.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ForbiddenResource(_)), "{driver_id}");
    }
    assert!(
        fx.store
            .get_active_delivery_for_order(order.id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn unpaid_and_pickup_orders_are_not_claimable() {
    let fx = Fixture::new();
    let a = fx.restaurant(10, "A").await;
    let d = fx.online_driver().await;

    let unpaid = fx.place(1, DeliveryType::Delivery, &[(a.id, 1_000, 1)]).await;
    let err = claims::claim_order(&fx.state, d.id, unpaid.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { ref current, .. } if current == "pending"));

    let pickup = fx.place(1, DeliveryType::Pickup, &[(a.id, 1_000, 1)]).await;
    fx.pay(&pickup).await;
    let err = claims::claim_order(&fx.state, d.id, pickup.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn available_orders_hide_claimed_and_pickup_orders() {
    let fx = Fixture::new();
    let a = fx.restaurant(10, "A").await;
    let d = fx.online_driver().await;

    let first = fx.place(1, DeliveryType::Delivery, &[(a.id, 1_000, 1)]).await;
    let second = fx.place(2, DeliveryType::Delivery, &[(a.id, 1_000, 1)]).await;
    let pickup = fx.place(3, DeliveryType::Pickup, &[(a.id, 1_000, 1)]).await;
    let unpaid = fx.place(4, DeliveryType::Delivery, &[(a.id, 1_000, 1)]).await;
    for order in [&first, &second, &pickup] {
        fx.pay(order).await;
    }

    let ids = |list: Vec<dispatch::AvailableOrder>| -> Vec<i32> {
        let mut ids: Vec<i32> = list.into_iter().map(|o| o.order.id).collect();
        ids.sort();
        ids
    };
    let before = dispatch::available_orders(&fx.state).await.unwrap();
    assert!(before.iter().all(|o| o.estimated_payout_cents == 425));
    assert_eq!(ids(before), vec![first.id, second.id]);

    claims::claim_order(&fx.state, d.id, first.id, None)
        .await
        .unwrap();
    let after = dispatch::available_orders(&fx.state).await.unwrap();
    assert_eq!(ids(after), vec![second.id]);
    assert_ne!(unpaid.id, second.id);
}

#[tokio::test]
async fn pickup_waits_for_the_kitchen() {
    let fx = Fixture::new();
    let a = fx.restaurant(10, "A").await;
    let d = fx.online_driver().await;
    let order = fx.place(1, DeliveryType::Delivery, &[(a.id, 1_000, 1)]).await;
    fx.pay(&order).await;
    let delivery = claims::claim_order(&fx.state, d.id, order.id, None)
        .await
        .unwrap();

    let err = deliveries::advance(&fx.state, d.id, delivery.id, DeliveryStatus::PickedUp, None)
        .await
        .unwrap_err();
    match err {
        AppError::InvalidTransition {
            entity, current, ..
        } => {
            assert_eq!(entity, "order");
            assert_eq!(current, "paid");
        }
        other => panic!("unexpected {other:?}"),
    }

    orders::mark_portion_complete(&fx.state, 10, order.id, a.id)
        .await
        .unwrap();
    let picked = deliveries::advance(
        &fx.state,
        d.id,
        delivery.id,
        DeliveryStatus::PickedUp,
        Some("bag sealed".into()),
    )
    .await
    .unwrap();
    assert_eq!(picked.status, DeliveryStatus::PickedUp);
    assert!(picked.picked_up_at.is_some());
    assert_eq!(picked.notes.as_deref(), Some("bag sealed"));
}

#[tokio::test]
async fn deliveries_only_move_forward_for_their_driver() {
    let fx = Fixture::new();
    let a = fx.restaurant(10, "A").await;
    let d = fx.online_driver().await;
    let other = fx.online_driver().await;
    let order = fx.place(1, DeliveryType::Delivery, &[(a.id, 1_000, 1)]).await;
    fx.pay(&order).await;
    orders::mark_portion_complete(&fx.state, 10, order.id, a.id)
        .await
        .unwrap();
    let delivery = claims::claim_order(&fx.state, d.id, order.id, None)
        .await
        .unwrap();

    let skip = deliveries::advance(&fx.state, d.id, delivery.id, DeliveryStatus::Delivered, None)
        .await
        .unwrap_err();
    assert!(matches!(skip, AppError::InvalidTransition { ref current, .. } if current == "claimed"));

    let stranger = deliveries::advance(
        &fx.state,
        other.id,
        delivery.id,
        DeliveryStatus::PickedUp,
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(stranger, AppError::ForbiddenResource(_)));

    assert!(matches!(
        deliveries::get_details(&fx.state, &driver(other.id), delivery.id).await,
        Err(AppError::ForbiddenResource(_))
    ));
    let details = deliveries::get_details(&fx.state, &driver(d.id), delivery.id)
        .await
        .unwrap();
    assert_eq!(details.delivery.status, DeliveryStatus::Claimed);
    assert_eq!(details.updates.len(), 1);
}

#[tokio::test]
async fn new_orders_alert_drivers_until_claimed() {
    let fx = Fixture::new();
    let a = fx.restaurant(10, "A").await;
    let d1 = fx.online_driver().await;
    let d2 = fx.online_driver().await;
    let offline = fx.driver(ApprovalStatus::Approved, false).await;
    let order = fx.place(1, DeliveryType::Delivery, &[(a.id, 1_000, 1)]).await;
    fx.pay(&order).await;

    assert_eq!(fx.state.alerts.pending_for(d1.id), vec![order.id]);
    assert_eq!(fx.state.alerts.pending_for(d2.id), vec![order.id]);
    assert!(fx.state.alerts.pending_for(offline.id).is_empty());

    let inbox = notifications::poll(&fx.state, Recipient::driver(d1.id))
        .await
        .unwrap();
    assert_eq!(inbox.pending_alerts, vec![order.id]);
    assert!(
        inbox
            .notifications
            .iter()
            .any(|n| n.kind == NotificationKind::NewOrder && n.order_id == Some(order.id))
    );
    let offline_inbox = notifications::poll(&fx.state, Recipient::driver(offline.id))
        .await
        .unwrap();
    assert_eq!(offline_inbox.unread_count, 0);

    claims::claim_order(&fx.state, d2.id, order.id, None)
        .await
        .unwrap();
    assert!(fx.state.alerts.pending_for(d1.id).is_empty());

    let customer_inbox = notifications::poll(&fx.state, Recipient::customer(1))
        .await
        .unwrap();
    assert!(
        customer_inbox
            .notifications
            .iter()
            .any(|n| n.kind == NotificationKind::OrderUpdate
                && n.payload["delivery_status"] == "claimed")
    );
}

#[tokio::test]
async fn going_offline_drops_alerts() {
    let fx = Fixture::new();
    let a = fx.restaurant(10, "A").await;
    let d = fx.online_driver().await;
    let order = fx.place(1, DeliveryType::Delivery, &[(a.id, 1_000, 1)]).await;
    fx.pay(&order).await;

    let driver = dispatch::set_availability(&fx.state, d.id, false).await.unwrap();
    assert!(!driver.is_available);
    assert!(fx.state.alerts.pending_for(d.id).is_empty());

    let err = claims::claim_order(&fx.state, d.id, order.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ForbiddenResource(_)));
}
