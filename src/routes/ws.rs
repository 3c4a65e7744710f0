//! Push channel.
//!
//! GET /ws, authenticated by the gateway headers like every other route.
//!
//! - Server → client: [`PushEvent`] as JSON text frames. Pushes from the hub,
//!   periodic poll snapshots and, for drivers, repeating new-order alerts.
//! - Client → server: [`ClientCommand`] (`ack_alert`, `poll`).

use axum::{
    Extension, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing,
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use tokio::{
    sync::{broadcast, mpsc},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

use crate::{
    app_state::AppState,
    middleware::{self, Actor},
    models::ActorRole,
    push::{PushEvent, poller},
    services::notifications::POLL_LIMIT,
};

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    AckAlert { order_id: Option<i32> },
    Poll,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ws", routing::get(handle_ws))
        .route_layer(axum::middleware::from_fn(
            middleware::any_actor_authorization,
        ))
}

async fn handle_ws(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| push_session(socket, state, actor))
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &PushEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| {
        tracing::warn!("Failed to encode push event: {e}");
    })?;
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn push_session(socket: WebSocket, state: AppState, actor: Actor) {
    let (mut sink, mut stream) = socket.split();
    let recipient = actor.recipient();
    tracing::info!(%recipient, "Push session connected");

    let mut hub_rx = state.hub.subscribe(recipient);
    let token = CancellationToken::new();
    let (tx, mut task_rx) = mpsc::channel::<PushEvent>(16);

    poller::spawn_poll_task(
        state.store.clone(),
        state.alerts.clone(),
        recipient,
        state.polling.interval_for(actor.role),
        POLL_LIMIT,
        token.child_token(),
        tx.clone(),
    );
    if actor.role == ActorRole::Driver {
        poller::spawn_alert_task(
            state.alerts.clone(),
            actor.id,
            state.polling.alert_repeat,
            token.child_token(),
            tx.clone(),
        );
    }

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // skip immediate

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }

            event = hub_rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Persisted notifications reach the client on the next poll.
                        tracing::warn!(%recipient, lagged = n, "Push subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            Some(event) = task_rx.recv() => {
                if send_event(&mut sink, &event).await.is_err() {
                    break;
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(ClientCommand::AckAlert { order_id }) => {
                                if actor.role == ActorRole::Driver {
                                    state.alerts.acknowledge(actor.id, order_id);
                                }
                            }
                            Ok(ClientCommand::Poll) => {
                                match poller::snapshot(state.store.as_ref(), &state.alerts, recipient, POLL_LIMIT).await {
                                    Ok(snap) => {
                                        if send_event(&mut sink, &PushEvent::Poll(snap)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(err) => tracing::warn!(%recipient, "Poll failed: {}", err),
                                }
                            }
                            Err(err) => tracing::debug!(%recipient, "Ignoring client message: {}", err),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    token.cancel();
    drop(hub_rx);
    state.hub.release(recipient);
    tracing::info!(%recipient, "Push session disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_commands() {
        let ack: ClientCommand =
            serde_json::from_str(r#"{"type":"ack_alert","order_id":7}"#).unwrap();
        assert!(matches!(ack, ClientCommand::AckAlert { order_id: Some(7) }));

        let ack_all: ClientCommand = serde_json::from_str(r#"{"type":"ack_alert"}"#).unwrap();
        assert!(matches!(ack_all, ClientCommand::AckAlert { order_id: None }));

        let poll: ClientCommand = serde_json::from_str(r#"{"type":"poll"}"#).unwrap();
        assert!(matches!(poll, ClientCommand::Poll));
    }
}
