mod common;

use common::{Fixture, customer};
use foodhub_orderservice::{
    app_error::AppError,
    lifecycle::refund::RefundAction,
    models::{DeliveryType, NotificationEntity, NotificationKind, OrderStatus, Recipient, RefundStatus},
    services::{
        notifications,
        orders::{self, CancelOrder},
        refunds,
    },
    store::Store,
};

/// Two restaurants, A sells $10 and B sells $5; the order is paid.
async fn split_paid_order(fx: &Fixture) -> (i32, i32, i32) {
    let a = fx.restaurant(10, "A").await;
    let b = fx.restaurant(20, "B").await;
    let order = fx
        .place(1, DeliveryType::Delivery, &[(a.id, 1_000, 1), (b.id, 250, 2)])
        .await;
    fx.pay(&order).await;
    (order.id, a.id, b.id)
}

fn cancel_with_refund() -> CancelOrder {
    CancelOrder {
        reason: Some("running late".into()),
        request_refund: true,
    }
}

async fn cancel_and_request(fx: &Fixture, order_id: i32) -> Vec<NotificationEntity> {
    orders::cancel_order(&fx.state, &customer(1), order_id, cancel_with_refund())
        .await
        .unwrap()
        .refund_requests
}

#[tokio::test]
async fn cancelled_split_order_is_refunded_per_restaurant() {
    let fx = Fixture::new();
    let (order_id, a, b) = split_paid_order(&fx).await;

    let outcome = orders::cancel_order(&fx.state, &customer(1), order_id, cancel_with_refund())
        .await
        .unwrap();
    assert_eq!(outcome.order.status, OrderStatus::Cancelled);
    assert_eq!(outcome.refund_requests.len(), 2);

    let request_for = |restaurant_id: i32| {
        outcome
            .refund_requests
            .iter()
            .find(|n| n.refund_request().unwrap().restaurant_id == restaurant_id)
            .unwrap()
            .clone()
    };
    let to_a = request_for(a);
    let to_b = request_for(b);
    assert_eq!(to_a.recipient(), Recipient::owner(10));
    assert_eq!(to_b.recipient(), Recipient::owner(20));
    assert_eq!(to_a.refund_request().unwrap().amount_cents, 1_000);
    assert_eq!(to_b.refund_request().unwrap().amount_cents, 500);

    let denied = refunds::resolve(
        &fx.state,
        20,
        to_b.id,
        RefundAction::Deny,
        Some("already cooked".into()),
    )
    .await
    .unwrap();
    assert_eq!(denied.request.refund_request().unwrap().status, RefundStatus::Denied);
    assert_eq!(fx.order(order_id).await.status, OrderStatus::Cancelled);

    // B's decision leaves A's request untouched.
    let pending_a = refunds::list_pending_for_owner(&fx.state, 10, 50).await.unwrap();
    assert_eq!(pending_a.len(), 1);
    assert_eq!(pending_a[0].id, to_a.id);

    let approved = refunds::resolve(&fx.state, 10, to_a.id, RefundAction::Approve, None)
        .await
        .unwrap();
    let payload = approved.request.refund_request().unwrap();
    assert_eq!(payload.status, RefundStatus::Approved);
    assert_eq!(payload.resolved_by, Some(10));
    assert!(payload.processed_at.is_some());
    assert!(payload.gateway.as_ref().unwrap().succeeded);
    assert_eq!(fx.order(order_id).await.status, OrderStatus::Cancelled);

    let refunded = fx.gateway.refunds();
    assert_eq!(refunded.len(), 1);
    assert_eq!(refunded[0].restaurant_id, a);
    assert_eq!(refunded[0].amount_cents, 1_000);

    let inbox = notifications::list(&fx.state, Recipient::customer(1), None)
        .await
        .unwrap();
    let deny = inbox
        .iter()
        .find(|n| n.kind == NotificationKind::RefundDeny)
        .unwrap();
    assert_eq!(deny.payload["restaurant_id"], b);
    assert_eq!(deny.payload["amount_cents"], 500);
    let approve = inbox
        .iter()
        .find(|n| n.kind == NotificationKind::RefundApprove)
        .unwrap();
    assert_eq!(approve.payload["restaurant_id"], a);
    assert_eq!(approve.payload["amount_cents"], 1_000);
}

#[tokio::test]
async fn a_request_is_resolved_once() {
    let fx = Fixture::new();
    let (order_id, _, _) = split_paid_order(&fx).await;
    let requests = cancel_and_request(&fx, order_id).await;
    let request = &requests[0];
    let owner_id = request.recipient_id;

    refunds::resolve(&fx.state, owner_id, request.id, RefundAction::Approve, None)
        .await
        .unwrap();
    let again = refunds::resolve(&fx.state, owner_id, request.id, RefundAction::Deny, None)
        .await
        .unwrap_err();
    match again {
        AppError::InvalidTransition { current, .. } => assert_eq!(current, "approved"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(fx.gateway.refunds().len(), 1);
}

#[tokio::test]
async fn owners_resolve_only_their_requests() {
    let fx = Fixture::new();
    let (order_id, _, _) = split_paid_order(&fx).await;
    let requests = cancel_and_request(&fx, order_id).await;
    let foreign = requests.iter().find(|n| n.recipient_id == 20).unwrap();

    let err = refunds::resolve(&fx.state, 10, foreign.id, RefundAction::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ForbiddenResource(_)));

    let missing = refunds::resolve(&fx.state, 10, 9_999, RefundAction::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(missing, AppError::NotFound));
}

#[tokio::test]
async fn gateway_failure_is_recorded_without_undoing_approval() {
    let fx = Fixture::new();
    let (order_id, _, _) = split_paid_order(&fx).await;
    let requests = cancel_and_request(&fx, order_id).await;
    let request = &requests[0];
    fx.gateway.set_refunds_failing(true);

    let outcome = refunds::resolve(
        &fx.state,
        request.recipient_id,
        request.id,
        RefundAction::Approve,
        None,
    )
    .await
    .unwrap();
    let payload = outcome.request.refund_request().unwrap();
    assert_eq!(payload.status, RefundStatus::Approved);
    let gateway = payload.gateway.unwrap();
    assert!(!gateway.succeeded);
    assert!(gateway.error.unwrap().contains("500"));
    assert!(outcome.customer_notification.is_some());
}

#[tokio::test]
async fn customers_request_refunds_once_per_portion() {
    let fx = Fixture::new();
    let (order_id, _, _) = split_paid_order(&fx).await;

    let created = refunds::request_refund(&fx.state, 1, order_id, Some("cold food".into()))
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    assert!(
        created
            .iter()
            .all(|n| n.refund_request().unwrap().reason.as_deref() == Some("cold food"))
    );

    let duplicate = refunds::request_refund(&fx.state, 1, order_id, None)
        .await
        .unwrap_err();
    assert!(matches!(duplicate, AppError::BadRequest(_)));

    let stranger = refunds::request_refund(&fx.state, 2, order_id, None)
        .await
        .unwrap_err();
    assert!(matches!(stranger, AppError::ForbiddenResource(_)));
}

#[tokio::test]
async fn unpaid_orders_cannot_be_refunded() {
    let fx = Fixture::new();
    let a = fx.restaurant(10, "A").await;
    let order = fx.place(1, DeliveryType::Pickup, &[(a.id, 800, 1)]).await;

    let err = refunds::request_refund(&fx.state, 1, order.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));

    // Cancelling before payment never opens refund requests.
    let outcome = orders::cancel_order(&fx.state, &customer(1), order.id, cancel_with_refund())
        .await
        .unwrap();
    assert!(outcome.refund_requests.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_refund_requests_open_each_portion_once() {
    let fx = Fixture::new();
    let a = fx.restaurant(10, "A").await;
    let b = fx.restaurant(20, "B").await;
    let mut order_ids = Vec::new();
    for _ in 0..100 {
        let order = fx
            .place(1, DeliveryType::Pickup, &[(a.id, 1_000, 1), (b.id, 500, 1)])
            .await;
        fx.pay(&order).await;
        order_ids.push(order.id);
    }

    let mut handles = Vec::new();
    for &order_id in &order_ids {
        for _ in 0..2 {
            let state = fx.state.clone();
            handles.push(tokio::spawn(async move {
                refunds::request_refund(&state, 1, order_id, None).await
            }));
        }
    }

    let mut opened = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(created) => {
                assert_eq!(created.len(), 2);
                opened += 1;
            }
            Err(AppError::BadRequest(_)) => refused += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(opened, 100);
    assert_eq!(refused, 100);

    for order_id in order_ids {
        let mut restaurants: Vec<i32> = fx
            .store
            .list_refund_requests(order_id)
            .await
            .unwrap()
            .iter()
            .map(|n| n.refund_request().unwrap().restaurant_id)
            .collect();
        restaurants.sort_unstable();
        assert_eq!(restaurants, vec![a.id, b.id]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_with_refund_races_a_direct_request_without_duplicates() {
    let fx = Fixture::new();
    let mut order_ids = Vec::new();
    for _ in 0..50 {
        let (order_id, _, _) = split_paid_order(&fx).await;
        order_ids.push(order_id);
    }

    let mut handles = Vec::new();
    for &order_id in &order_ids {
        let state = fx.state.clone();
        handles.push(tokio::spawn(async move {
            orders::cancel_order(&state, &customer(1), order_id, cancel_with_refund())
                .await
                .map(|outcome| outcome.refund_requests.len())
        }));
        let state = fx.state.clone();
        handles.push(tokio::spawn(async move {
            refunds::request_refund(&state, 1, order_id, None)
                .await
                .map(|created| created.len())
        }));
    }
    for handle in handles {
        // Losers see either an existing request or an already cancelled order.
        match handle.await.unwrap() {
            Ok(_) | Err(AppError::BadRequest(_)) | Err(AppError::InvalidTransition { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    for order_id in order_ids {
        assert_eq!(fx.store.list_refund_requests(order_id).await.unwrap().len(), 2);
    }
}
