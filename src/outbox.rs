//! Transactional outbox: events are stored with the state change that caused
//! them and relayed to the broker by a background task.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    models::CreateOutboxEntity, push::amqp::AmqpBus, schema::outbox, store::Store,
};

pub const STATUS_PENDING: &str = "PENDING";
pub const STATUS_PUBLISHED: &str = "PUBLISHED";

/// An event waiting to be written next to a state change.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    pub event_type: String,
    pub payload: String,
}

impl OutboxEvent {
    pub fn new<T: Serialize>(event_type: &str, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: event_type.to_string(),
            payload: serde_json::to_string(payload)?,
        })
    }

    pub fn into_entity(self) -> CreateOutboxEntity {
        CreateOutboxEntity {
            event_type: self.event_type,
            payload: self.payload,
            status: STATUS_PENDING.into(),
        }
    }
}

/// Writes `event` on `conn`, meant to be called inside the caller's transaction.
pub async fn publish(
    conn: &mut AsyncPgConnection,
    event: OutboxEvent,
) -> Result<(), diesel::result::Error> {
    diesel::insert_into(outbox::table)
        .values(event.into_entity())
        .execute(conn)
        .await?;
    Ok(())
}

/// Drains pending outbox rows to the broker until `token` is cancelled.
pub async fn relay(
    store: Arc<dyn Store>,
    bus: Arc<AmqpBus>,
    every: Duration,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                if let Err(err) = relay_once(store.as_ref(), &bus).await {
                    warn!("Outbox relay pass failed: {:#}", err);
                }
            }
        }
    }
    info!("Outbox relay stopped");
}

async fn relay_once(store: &dyn Store, bus: &AmqpBus) -> Result<()> {
    let pending = store
        .fetch_pending_outbox(100)
        .await
        .context("Failed to fetch pending outbox events")?;
    if pending.is_empty() {
        return Ok(());
    }

    let mut published = Vec::with_capacity(pending.len());
    for event in pending {
        // Stop at the first failure so events leave in insertion order.
        if let Err(err) = bus.publish_raw(&event.event_type, event.payload.as_bytes()).await {
            warn!("Failed to relay outbox event #{}: {:#}", event.id, err);
            break;
        }
        published.push(event.id);
    }

    store
        .mark_outbox_published(&published)
        .await
        .context("Failed to mark outbox events as published")?;
    info!("Relayed {} outbox events", published.len());
    Ok(())
}
