mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use common::Fixture;
use foodhub_orderservice::{
    middleware::{USER_ID_HEADER, USER_ROLE_HEADER},
    models::{DeliveryType, OrderStatus},
    routes,
};
use serde_json::{Value, json};
use tower::ServiceExt;

fn request(method: Method, uri: &str, actor: Option<(&str, i32)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((role, id)) = actor {
        builder = builder
            .header(USER_ROLE_HEADER, role)
            .header(USER_ID_HEADER, id.to_string());
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let fx = Fixture::new();
    let app = routes::app(fx.state.clone());

    let (status, body) = send(&app, request(Method::GET, "/customers/orders", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap().contains(USER_ID_HEADER));

    let (status, _) = send(
        &app,
        request(Method::GET, "/customers/orders", Some(("wizard", 1)), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_role_is_forbidden() {
    let fx = Fixture::new();
    let app = routes::app(fx.state.clone());

    let (status, _) = send(
        &app,
        request(Method::GET, "/customers/orders", Some(("driver", 7)), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        request(Method::GET, "/drivers/available-orders", Some(("customer", 1)), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        request(Method::GET, "/admin/stats", Some(("owner", 10)), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn order_flows_through_the_api() {
    let fx = Fixture::new();
    let restaurant = fx.restaurant(10, "A").await;
    let d1 = fx.online_driver().await;
    let d2 = fx.online_driver().await;
    let app = routes::app(fx.state.clone());

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/customers/orders",
            Some(("customer", 1)),
            Some(json!({
                "delivery_type": "delivery",
                "delivery_address": "42 Elm Road",
                "delivery_phone": null,
                "special_instructions": "ring twice",
                "items": [
                    { "dish_id": 1, "restaurant_id": restaurant.id, "name": "Ramen", "unit_price_cents": 1_200, "quantity": 2 }
                ]
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "pending");
    let order_id = body["data"]["id"].as_i64().unwrap() as i32;
    let total = body["data"]["total_cents"].as_i64().unwrap();

    fx.gateway.succeed("ch_api", total);
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/payments/confirm",
            None,
            Some(json!({ "order_id": order_id, "charge_ref": "ch_api" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["newly_paid"], true);

    let (status, body) = send(
        &app,
        request(Method::GET, "/drivers/available-orders", Some(("driver", d1.id)), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let claim_uri = format!("/drivers/orders/{order_id}/claim");
    let (status, _) = send(
        &app,
        request(Method::POST, &claim_uri, Some(("driver", d1.id)), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        request(Method::POST, &claim_uri, Some(("driver", d2.id)), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["data"]["order_id"], order_id);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            &format!("/customers/orders/{order_id}/cancel"),
            Some(("customer", 2)),
            Some(json!({ "reason": null })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(fx.order(order_id).await.status, OrderStatus::Paid);

    let (status, body) = send(
        &app,
        request(Method::GET, "/notifications/poll", Some(("driver", d1.id)), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["unread_count"].as_i64().unwrap() >= 1);
}

#[tokio::test]
async fn rejected_transitions_report_the_current_status() {
    let fx = Fixture::new();
    let restaurant = fx.restaurant(10, "A").await;
    let order = fx
        .place(1, DeliveryType::Pickup, &[(restaurant.id, 900, 1)])
        .await;
    let app = routes::app(fx.state.clone());

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            &format!("/owners/orders/{}/portions/{}/complete", order.id, restaurant.id),
            Some(("owner", 10)),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["data"]["current_status"], "pending");

    let (status, _) = send(
        &app,
        request(Method::GET, "/orders/9999", Some(("customer", 1)), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
