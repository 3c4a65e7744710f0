//! Per-restaurant refunds. A refund request is a `refund_request`
//! notification owned by one restaurant's owner; each portion of an order is
//! resolved on its own.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{clean_text, dispatch, load_order, notifications};
use crate::{
    api::payments::RefundRequest,
    app_error::AppError,
    app_state::AppState,
    events,
    lifecycle::refund::{self as refund_lifecycle, RefundAction},
    models::{
        CreateNotificationEntity, GatewayOutcome, NotificationEntity, NotificationKind,
        OrderEntity, OrderStatus, Recipient, RefundRequestPayload, RefundStatus,
    },
    outbox::OutboxEvent,
    store::{Cas, RefundResolution},
};

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct RefundResolutionOutcome {
    pub request: NotificationEntity,
    pub customer_notification: Option<NotificationEntity>,
}

/// Opens a pending refund request for every portion of `order` that has none
/// yet. Returns the requests created by this call; concurrent callers never
/// open the same portion twice.
pub async fn open_for_order(
    state: &AppState,
    order: &OrderEntity,
    reason: Option<String>,
) -> Result<Vec<NotificationEntity>, AppError> {
    let portions = state.store.get_order_portions(order.id).await?;
    let restaurants = dispatch::restaurants_of(state, order.id).await?;

    let batch: Vec<CreateNotificationEntity> = portions
        .iter()
        .filter_map(|p| {
            let restaurant = restaurants.iter().find(|r| r.id == p.restaurant_id)?;
            let payload = RefundRequestPayload {
                order_id: order.id,
                customer_id: order.customer_id,
                restaurant_id: restaurant.id,
                restaurant_name: restaurant.name.clone(),
                reason: reason.clone(),
                amount_cents: p.subtotal_cents,
                status: RefundStatus::Pending,
                resolver_notes: None,
                resolved_by: None,
                processed_at: None,
                gateway: None,
            };
            Some((restaurant.owner_id, payload))
        })
        .map(|(owner_id, payload)| {
            serde_json::to_value(&payload).map(|payload| {
                CreateNotificationEntity::new(
                    Recipient::owner(owner_id),
                    NotificationKind::RefundRequest,
                    order.id,
                    payload,
                )
            })
        })
        .collect::<Result<_, _>>()
        .map_err(anyhow::Error::from)?;

    if batch.is_empty() {
        return Ok(Vec::new());
    }
    let created = state.store.open_refund_requests(order.id, batch).await?;
    notifications::push_stored(state, &created);
    info!(
        "Opened {} refund requests for order #{}",
        created.len(),
        order.id
    );
    Ok(created)
}

/// Customer-initiated refund on a paid or completed order.
pub async fn request_refund(
    state: &AppState,
    customer_id: i32,
    order_id: i32,
    reason: Option<String>,
) -> Result<Vec<NotificationEntity>, AppError> {
    let reason = clean_text("reason", reason)?;
    let order = load_order(state, order_id).await?;
    if order.customer_id != customer_id {
        return Err(AppError::ForbiddenResource(format!(
            "order #{order_id} is not yours"
        )));
    }
    if !matches!(order.status, OrderStatus::Paid | OrderStatus::Completed) {
        return Err(AppError::invalid_transition(
            "order",
            order.status,
            "refund_requested",
        ));
    }

    let created = open_for_order(state, &order, reason).await?;
    if created.is_empty() {
        return Err(AppError::BadRequest(format!(
            "a refund has already been requested for every part of order #{order_id}"
        )));
    }
    Ok(created)
}

/// Pending refund requests addressed to `owner_id`, newest first.
pub async fn list_pending_for_owner(
    state: &AppState,
    owner_id: i32,
    limit: i64,
) -> Result<Vec<NotificationEntity>, AppError> {
    Ok(state
        .store
        .list_notifications(Recipient::owner(owner_id), limit)
        .await?
        .into_iter()
        .filter(|n| {
            n.refund_request()
                .is_some_and(|p| p.status == RefundStatus::Pending)
        })
        .collect())
}

async fn call_gateway(state: &AppState, request: &RefundRequestPayload) -> GatewayOutcome {
    let result = state
        .gateway
        .refund(RefundRequest {
            order_id: request.order_id,
            restaurant_id: request.restaurant_id,
            amount_cents: request.amount_cents,
            reason: request.reason.clone(),
        })
        .await;

    match result {
        Ok(receipt) => GatewayOutcome {
            succeeded: true,
            reference: Some(receipt.reference),
            error: None,
            recorded_at: Utc::now(),
        },
        Err(err) => {
            warn!(
                "Refund for order #{} restaurant #{} failed at the gateway: {}",
                request.order_id, request.restaurant_id, err
            );
            GatewayOutcome {
                succeeded: false,
                reference: None,
                error: Some(err.to_string()),
                recorded_at: Utc::now(),
            }
        }
    }
}

/// Approves or denies one refund request. Approval asks the gateway to pay
/// the portion back; its answer is recorded on the request but never undoes
/// the approval.
pub async fn resolve(
    state: &AppState,
    owner_id: i32,
    notification_id: i32,
    action: RefundAction,
    notes: Option<String>,
) -> Result<RefundResolutionOutcome, AppError> {
    let notes = clean_text("notes", notes)?;
    let notification = state
        .store
        .get_notification(notification_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let request = notification.refund_request().ok_or(AppError::NotFound)?;
    if notification.recipient() != Recipient::owner(owner_id) {
        return Err(AppError::ForbiddenResource(
            "refund request belongs to another restaurant".into(),
        ));
    }

    let resolved = refund_lifecycle::resolve(&request, action, owner_id, notes, Utc::now())?;
    let event = OutboxEvent::new(
        events::REFUND_RESOLVED,
        &events::RefundResolvedEvent {
            order_id: resolved.order_id,
            restaurant_id: resolved.restaurant_id,
            amount_cents: resolved.amount_cents,
            status: resolved.status,
        },
    )
    .map_err(anyhow::Error::from)?;

    let mut stored = match state
        .store
        .resolve_refund(
            RefundResolution {
                notification_id,
                resolved: resolved.clone(),
            },
            event,
        )
        .await?
    {
        Cas::Applied(notification) => notification,
        Cas::Rejected(current) => {
            return Err(AppError::invalid_transition(
                "refund request",
                current.status,
                resolved.status,
            ));
        }
    };
    info!(
        "Refund for order #{} restaurant #{} {}",
        resolved.order_id, resolved.restaurant_id, resolved.status
    );

    if action == RefundAction::Approve {
        let outcome = call_gateway(state, &resolved).await;
        let audited = RefundRequestPayload {
            gateway: Some(outcome),
            ..resolved.clone()
        };
        match state
            .store
            .record_refund_audit(notification_id, audited)
            .await
        {
            Ok(notification) => stored = notification,
            Err(err) => warn!(
                "Failed to record gateway outcome on refund request #{}: {}",
                notification_id, err
            ),
        }
    }

    let kind = match action {
        RefundAction::Approve => NotificationKind::RefundApprove,
        RefundAction::Deny => NotificationKind::RefundDeny,
    };
    let customer_notification = notifications::notify(
        state,
        vec![CreateNotificationEntity::new(
            Recipient::customer(resolved.customer_id),
            kind,
            resolved.order_id,
            json!({
                "order_id": resolved.order_id,
                "restaurant_id": resolved.restaurant_id,
                "restaurant_name": resolved.restaurant_name,
                "amount_cents": resolved.amount_cents,
                "notes": resolved.resolver_notes,
            }),
        )],
    )
    .await
    .map_err(|err| warn!("Failed to notify customer of refund decision: {}", err))
    .ok()
    .and_then(|mut created| created.pop());

    Ok(RefundResolutionOutcome {
        request: stored,
        customer_notification,
    })
}
