//! Real-time fan-out. Notifications are always persisted before they are
//! pushed, so a push that goes nowhere is recovered by the next poll.
//!
//! ```text
//! service ──persist──▶ Store ◀──poll task (per session, per-role cadence)
//!    │                                   │
//!    └──publish──▶ Publisher ─┬─ WsHub ──┴──▶ WebSocket session
//!                             └─ AmqpBus ───▶ broker (push.<role>.<id>)
//! ```

pub mod alerts;
pub mod amqp;
pub mod hub;
pub mod poller;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{NotificationEntity, Recipient};

pub use alerts::AlertBoard;
pub use hub::WsHub;

/// Messages delivered to a connected actor.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    Notification { notification: NotificationEntity },
    /// Another driver won the order; drop it from the available list.
    OrderClaimed { order_id: i32 },
    /// Orders the driver has not acknowledged yet.
    NewOrderAlert { order_ids: Vec<i32> },
    Poll(PollSnapshot),
}

/// What the pull path returns: the unread count plus the most recent items.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    pub unread_count: i64,
    pub notifications: Vec<NotificationEntity>,
    /// Unacknowledged new-order alerts, only ever non-empty for drivers.
    pub pending_alerts: Vec<i32>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("{0} has no open connection")]
    NotConnected(Recipient),

    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, recipient: Recipient, event: PushEvent) -> Result<(), PublishError>;
}

/// Publishes to every inner publisher; succeeds if any of them delivered.
pub struct MultiPublisher {
    publishers: Vec<Arc<dyn Publisher>>,
}

impl MultiPublisher {
    pub fn new(publishers: Vec<Arc<dyn Publisher>>) -> Self {
        Self { publishers }
    }
}

#[async_trait]
impl Publisher for MultiPublisher {
    async fn publish(&self, recipient: Recipient, event: PushEvent) -> Result<(), PublishError> {
        let mut last_err = PublishError::NotConnected(recipient);
        let mut delivered = false;
        for publisher in &self.publishers {
            match publisher.publish(recipient, event.clone()).await {
                Ok(()) => delivered = true,
                Err(err) => last_err = err,
            }
        }
        if delivered { Ok(()) } else { Err(last_err) }
    }
}
