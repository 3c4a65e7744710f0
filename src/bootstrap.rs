use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use futures::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{app_state::AppState, consumers::ConsumerFn, push::amqp::AmqpBus};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();
}

pub fn init_env() {
    if let Err(err) = dotenvy::dotenv() {
        info!("No .env file loaded: {}", err);
    }
}

/// Declares a durable queue per consumer, binds it to the exchange under its
/// own name and spawns a task that feeds deliveries to the handler.
pub async fn start_consumers(
    bus: &AmqpBus,
    state: Arc<AppState>,
    consumers: &[(&'static str, ConsumerFn)],
) -> Result<()> {
    for (queue, handler) in consumers.iter().copied() {
        let channel = bus.channel();
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to declare queue `{queue}`"))?;
        channel
            .queue_bind(
                queue,
                bus.exchange(),
                queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to bind queue `{queue}`"))?;
        let mut consumer = channel
            .basic_consume(
                queue,
                &format!("orderservice.{queue}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to consume `{queue}`"))?;

        let state = state.clone();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        if let Err(err) = handler(delivery, state.clone()).await {
                            warn!("Consumer `{}` failed: {:#}", queue, err);
                        }
                    }
                    Err(err) => {
                        error!("Consumer `{}` stream error: {}", queue, err);
                        break;
                    }
                }
            }
            warn!("Consumer `{}` stopped", queue);
        });
        info!("Consuming `{}`", queue);
    }
    Ok(())
}

/// Serves `app` until Ctrl-C, then cancels `token` so background tasks stop.
pub async fn serve(service_name: &str, app: Router, port: u16, token: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("{} listening on {}", service_name, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", err);
            }
            info!("Shutting down");
            token.cancel();
        })
        .await
        .context("Server error")
}
