//! Background tasks owned by a WebSocket session. Each stops as soon as its
//! token is cancelled or the session stops reading from the channel.

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AlertBoard, PollSnapshot, PushEvent};
use crate::{
    models::{ActorRole, Recipient},
    store::{Store, StoreResult},
};

/// Reads the unread count and the latest `limit` notifications.
pub async fn snapshot(
    store: &dyn Store,
    alerts: &AlertBoard,
    recipient: Recipient,
    limit: i64,
) -> StoreResult<PollSnapshot> {
    let unread_count = store.count_unread(recipient).await?;
    let notifications = store.list_notifications(recipient, limit).await?;
    let pending_alerts = match recipient.role {
        ActorRole::Driver => alerts.pending_for(recipient.id),
        _ => Vec::new(),
    };

    Ok(PollSnapshot {
        unread_count,
        notifications,
        pending_alerts,
    })
}

/// Sends a fresh [`PollSnapshot`] every `every`, starting immediately.
pub fn spawn_poll_task(
    store: Arc<dyn Store>,
    alerts: AlertBoard,
    recipient: Recipient,
    every: Duration,
    limit: i64,
    token: CancellationToken,
    tx: mpsc::Sender<PushEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    match snapshot(store.as_ref(), &alerts, recipient, limit).await {
                        Ok(snap) => {
                            if tx.send(PushEvent::Poll(snap)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(%recipient, "Poll failed: {}", err),
                    }
                }
            }
        }
        debug!(%recipient, "Poll task stopped");
    })
}

/// Re-sends the driver's unacknowledged alerts every `every` until acked.
pub fn spawn_alert_task(
    alerts: AlertBoard,
    driver_id: i32,
    every: Duration,
    token: CancellationToken,
    tx: mpsc::Sender<PushEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    let order_ids = alerts.pending_for(driver_id);
                    if order_ids.is_empty() {
                        continue;
                    }
                    if tx.send(PushEvent::NewOrderAlert { order_ids }).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(driver_id, "Alert task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{CreateNotificationEntity, NotificationKind},
        store::MemoryStore,
    };
    use serde_json::json;

    #[tokio::test]
    async fn poll_task_stops_when_cancelled() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(4);

        let handle = spawn_poll_task(
            store,
            AlertBoard::new(),
            Recipient::customer(1),
            Duration::from_millis(10),
            20,
            token.clone(),
            tx,
        );

        assert!(matches!(rx.recv().await, Some(PushEvent::Poll(_))));
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_counts_unread_for_recipient_only() {
        let store = MemoryStore::new();
        let alice = Recipient::customer(1);
        store
            .insert_notifications(vec![
                CreateNotificationEntity::new(alice, NotificationKind::OrderUpdate, 1, json!({})),
                CreateNotificationEntity::new(
                    Recipient::customer(2),
                    NotificationKind::OrderUpdate,
                    2,
                    json!({}),
                ),
            ])
            .await
            .unwrap();

        let snap = snapshot(&store, &AlertBoard::new(), alice, 20).await.unwrap();
        assert_eq!(snap.unread_count, 1);
        assert_eq!(snap.notifications.len(), 1);
        assert!(snap.pending_alerts.is_empty());
    }

    #[tokio::test]
    async fn alert_task_repeats_until_acknowledged() {
        let alerts = AlertBoard::new();
        alerts.raise(5, 40);
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(4);

        let _handle = spawn_alert_task(
            alerts.clone(),
            5,
            Duration::from_millis(10),
            token.clone(),
            tx,
        );

        for _ in 0..2 {
            match rx.recv().await {
                Some(PushEvent::NewOrderAlert { order_ids }) => assert_eq!(order_ids, vec![40]),
                other => panic!("unexpected {other:?}"),
            }
        }
        token.cancel();
    }
}
