use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{PublishError, Publisher, PushEvent};
use crate::models::Recipient;

/// Enough to absorb a burst while a session is busy writing.
const CHANNEL_CAPACITY: usize = 64;

/// In-process registry of connected actors, one broadcast channel each so a
/// user with several tabs open receives every event on all of them.
#[derive(Clone, Default)]
pub struct WsHub {
    channels: Arc<DashMap<Recipient, broadcast::Sender<PushEvent>>>,
}

impl WsHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, recipient: Recipient) -> broadcast::Receiver<PushEvent> {
        self.channels
            .entry(recipient)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn is_connected(&self, recipient: Recipient) -> bool {
        self.channels
            .get(&recipient)
            .is_some_and(|tx| tx.receiver_count() > 0)
    }

    /// Drops the channel once its last session has gone.
    pub fn release(&self, recipient: Recipient) {
        self.channels
            .remove_if(&recipient, |_, tx| tx.receiver_count() == 0);
    }

    pub fn connected_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|entry| entry.value().receiver_count() > 0)
            .count()
    }
}

#[async_trait]
impl Publisher for WsHub {
    async fn publish(&self, recipient: Recipient, event: PushEvent) -> Result<(), PublishError> {
        let Some(tx) = self.channels.get(&recipient) else {
            return Err(PublishError::NotConnected(recipient));
        };
        tx.send(event)
            .map(|_| ())
            .map_err(|_| PublishError::NotConnected(recipient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_session_of_recipient() {
        let hub = WsHub::new();
        let alice = Recipient::customer(1);
        let mut tab_a = hub.subscribe(alice);
        let mut tab_b = hub.subscribe(alice);

        hub.publish(alice, PushEvent::OrderClaimed { order_id: 9 })
            .await
            .unwrap();

        assert!(matches!(tab_a.recv().await, Ok(PushEvent::OrderClaimed { order_id: 9 })));
        assert!(matches!(tab_b.recv().await, Ok(PushEvent::OrderClaimed { order_id: 9 })));
    }

    #[tokio::test]
    async fn publish_to_absent_recipient_fails_without_side_effects() {
        let hub = WsHub::new();
        let err = hub
            .publish(Recipient::driver(4), PushEvent::OrderClaimed { order_id: 1 })
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::NotConnected(_)));
        assert_eq!(hub.connected_count(), 0);
    }

    #[tokio::test]
    async fn release_keeps_channel_while_sessions_remain() {
        let hub = WsHub::new();
        let owner = Recipient::owner(2);
        let first = hub.subscribe(owner);
        let _second = hub.subscribe(owner);

        drop(first);
        hub.release(owner);
        assert!(hub.is_connected(owner));
    }
}
