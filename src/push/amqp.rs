use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{BasicPublishOptions, ExchangeDeclareOptions},
    types::FieldTable,
};
use tracing::info;

use super::{PublishError, Publisher, PushEvent};
use crate::models::Recipient;

/// Topic exchange shared by outbox relaying, consumers and push fan-out.
pub struct AmqpBus {
    // Keeps the connection alive for as long as the channel is used.
    _connection: Connection,
    channel: Channel,
    exchange: String,
}

impl AmqpBus {
    pub async fn connect(url: &str, exchange: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .context("Failed to connect to the AMQP broker")?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open an AMQP channel")?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to declare exchange `{exchange}`"))?;
        info!("Connected to AMQP exchange `{}`", exchange);

        Ok(Self {
            _connection: connection,
            channel,
            exchange: exchange.to_string(),
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Publishes `payload` and waits for the broker to confirm it.
    pub async fn publish_raw(&self, routing_key: &str, payload: &[u8]) -> Result<()> {
        self.channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await?
            .await?;
        Ok(())
    }
}

pub fn push_routing_key(recipient: Recipient) -> String {
    format!("push.{}.{}", recipient.role, recipient.id)
}

#[async_trait]
impl Publisher for AmqpBus {
    async fn publish(&self, recipient: Recipient, event: PushEvent) -> Result<(), PublishError> {
        let payload =
            serde_json::to_vec(&event).map_err(|e| PublishError::Transport(e.to_string()))?;
        self.publish_raw(&push_routing_key(recipient), &payload)
            .await
            .map_err(|e| PublishError::Transport(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_key_names_role_and_id() {
        assert_eq!(push_routing_key(Recipient::driver(12)), "push.driver.12");
        assert_eq!(push_routing_key(Recipient::owner(3)), "push.owner.3");
    }
}
