//! Per-client connection handling.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sirocco_core::types::TickSize;

use crate::server::ServerState;
use crate::ws::connection::ConnectionId;
use crate::ws::message::ClientMessage;

/// Capacity of each client's outbound channel; overflowing it marks the
/// client as too slow and detaches it.
const CLIENT_QUEUE_CAPACITY: usize = 64;

/// Upgrade handler for the streaming endpoint.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Runs one client connection: a writer draining the client's outbound
/// channel and a reader parsing inbound control messages.
async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let id = ConnectionId::generate();
    info!(%id, "streaming client connected");

    let (tx, mut rx) = mpsc::channel::<Arc<str>>(CLIENT_QUEUE_CAPACITY);
    state.clients.register(id, tx);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender
                .send(Message::Text(payload.to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => handle_client_message(&text, &state),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%id, error = %e, "client read error");
                break;
            }
        }
    }

    info!(%id, "streaming client disconnected");
    state.clients.unregister(id);
    writer.abort();
}

fn handle_client_message(text: &str, state: &Arc<ServerState>) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::SetTick { tick }) => match TickSize::try_from(tick) {
            Ok(tick_size) => {
                state.aggregator.set_tick(tick_size);
                info!(tick = %tick_size, "aggregation tick changed");
            }
            Err(e) => warn!(error = %e, "ignoring tick change"),
        },
        Ok(ClientMessage::ChangeSymbol { symbol }) => {
            if symbol.is_empty() {
                return;
            }
            let symbol = symbol.to_uppercase();
            info!(symbol = %symbol, "symbol change requested");

            // Capacity-one channel: a pending request already covers this
            // cycle, redundant ones coalesce.
            if state.symbol_tx.try_send(symbol).is_err() {
                debug!("symbol change already pending");
            }
        }
        Err(e) => warn!(error = %e, "ignoring unknown client message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BookRegistry;
    use crate::ws::connection::ClientRegistry;
    use sirocco_book::Aggregator;

    fn test_state(symbol_tx: mpsc::Sender<String>) -> Arc<ServerState> {
        Arc::new(ServerState {
            registry: Arc::new(BookRegistry::new()),
            clients: ClientRegistry::new(),
            aggregator: Arc::new(Aggregator::new(TickSize::T1)),
            symbol_tx,
        })
    }

    #[tokio::test]
    async fn test_set_tick_updates_aggregator() {
        let (tx, _rx) = mpsc::channel(1);
        let state = test_state(tx);

        handle_client_message(r#"{"type":"set_tick","tick":50}"#, &state);
        assert_eq!(state.aggregator.tick(), TickSize::T50);
    }

    #[tokio::test]
    async fn test_invalid_tick_ignored() {
        let (tx, _rx) = mpsc::channel(1);
        let state = test_state(tx);

        handle_client_message(r#"{"type":"set_tick","tick":0.25}"#, &state);
        assert_eq!(state.aggregator.tick(), TickSize::T1);
    }

    #[tokio::test]
    async fn test_change_symbol_forwards_to_orchestrator() {
        let (tx, mut rx) = mpsc::channel(1);
        let state = test_state(tx);

        handle_client_message(r#"{"type":"change_symbol","symbol":"ethusdt"}"#, &state);
        assert_eq!(rx.recv().await.unwrap(), "ETHUSDT");
    }

    #[tokio::test]
    async fn test_redundant_symbol_changes_coalesce() {
        let (tx, mut rx) = mpsc::channel(1);
        let state = test_state(tx);

        handle_client_message(r#"{"type":"change_symbol","symbol":"ETHUSDT"}"#, &state);
        handle_client_message(r#"{"type":"change_symbol","symbol":"SOLUSDT"}"#, &state);

        assert_eq!(rx.recv().await.unwrap(), "ETHUSDT");
        assert!(rx.try_recv().is_err(), "second request coalesced away");
    }

    #[tokio::test]
    async fn test_empty_symbol_ignored() {
        let (tx, mut rx) = mpsc::channel(1);
        let state = test_state(tx);

        handle_client_message(r#"{"type":"change_symbol","symbol":""}"#, &state);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_message_type_ignored() {
        let (tx, mut rx) = mpsc::channel(1);
        let state = test_state(tx);

        handle_client_message(r#"{"type":"subscribe","channel":"trades"}"#, &state);
        handle_client_message("not json at all", &state);

        assert_eq!(state.aggregator.tick(), TickSize::T1);
        assert!(rx.try_recv().is_err());
    }
}
