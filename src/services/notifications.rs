use tracing::{debug, warn};

use crate::{
    app_error::AppError,
    app_state::AppState,
    models::{CreateNotificationEntity, NotificationEntity, Recipient},
    push::{PollSnapshot, PushEvent, poller},
};

/// Items returned by a poll when the caller does not ask for a limit.
pub const POLL_LIMIT: i64 = 20;
pub const MAX_LIST_LIMIT: i64 = 100;

/// Persists the batch, then pushes each stored notification to its recipient.
/// Pushing never blocks the caller and its failures are only logged.
pub async fn notify(
    state: &AppState,
    batch: Vec<CreateNotificationEntity>,
) -> Result<Vec<NotificationEntity>, AppError> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    let created = state.store.insert_notifications(batch).await?;
    push_stored(state, &created);
    Ok(created)
}

/// Pushes notifications that are already persisted.
pub fn push_stored(state: &AppState, stored: &[NotificationEntity]) {
    for notification in stored {
        push(
            state,
            notification.recipient(),
            PushEvent::Notification {
                notification: notification.clone(),
            },
        );
    }
}

/// [`notify`] for informational notifications whose loss must not fail an
/// already committed state change.
pub async fn notify_logged(state: &AppState, batch: Vec<CreateNotificationEntity>) {
    if let Err(err) = notify(state, batch).await {
        warn!("Failed to store notifications: {}", err);
    }
}

/// Fire-and-forget push.
pub fn push(state: &AppState, recipient: Recipient, event: PushEvent) {
    let publisher = state.publisher.clone();
    tokio::spawn(async move {
        if let Err(err) = publisher.publish(recipient, event).await {
            debug!(%recipient, "Push not delivered: {}", err);
        }
    });
}

pub async fn poll(state: &AppState, recipient: Recipient) -> Result<PollSnapshot, AppError> {
    Ok(poller::snapshot(state.store.as_ref(), &state.alerts, recipient, POLL_LIMIT).await?)
}

pub async fn list(
    state: &AppState,
    recipient: Recipient,
    limit: Option<i64>,
) -> Result<Vec<NotificationEntity>, AppError> {
    let limit = limit.unwrap_or(POLL_LIMIT).clamp(1, MAX_LIST_LIMIT);
    Ok(state.store.list_notifications(recipient, limit).await?)
}

/// Only the recipient may mark a notification read; anyone else sees 404.
pub async fn mark_read(
    state: &AppState,
    recipient: Recipient,
    notification_id: i32,
) -> Result<NotificationEntity, AppError> {
    state
        .store
        .mark_read(notification_id, recipient)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn mark_all_read(state: &AppState, recipient: Recipient) -> Result<usize, AppError> {
    Ok(state.store.mark_all_read(recipient).await?)
}
