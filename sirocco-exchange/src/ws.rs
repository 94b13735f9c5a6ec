//! Shared WebSocket plumbing for venue sessions.

use std::time::Duration;

use futures::SinkExt;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use sirocco_core::error::NetworkError;

/// A connected venue WebSocket stream.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake deadline for venue sessions.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period between signaling shutdown and tearing the session down.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Dials a venue WebSocket endpoint with the handshake timeout applied.
///
/// # Errors
///
/// Returns [`NetworkError::Timeout`] when the handshake deadline passes
/// and [`NetworkError::ConnectionFailed`] on any transport failure.
pub async fn connect(url: &str) -> Result<WsStream, NetworkError> {
    let (stream, _) = timeout(CONNECT_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| NetworkError::Timeout {
            timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
        })?
        .map_err(|e| NetworkError::ConnectionFailed {
            reason: e.to_string(),
        })?;
    Ok(stream)
}

/// Serializes `value` and sends it as a text frame.
///
/// # Errors
///
/// Returns [`NetworkError::WebSocket`] on serialization or send failure.
pub async fn send_json<T: Serialize>(
    stream: &mut WsStream,
    value: &T,
) -> Result<(), NetworkError> {
    let json = serde_json::to_string(value).map_err(|e| NetworkError::WebSocket {
        reason: format!("failed to serialize: {e}"),
    })?;
    stream
        .send(Message::Text(json))
        .await
        .map_err(|e| NetworkError::WebSocket {
            reason: e.to_string(),
        })
}

/// Cancellation signal fanned out to an adapter's background tasks.
///
/// Dropping receivers is fine; triggering is idempotent and sticky enough
/// for the single teardown each adapter performs.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Creates a new shutdown signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Returns a receiver that resolves once shutdown is triggered.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signals all subscribed tasks to stop.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_reaches_subscriber() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        shutdown.trigger();
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_trigger_without_subscribers() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        // A receiver subscribed after the trigger misses it; adapters
        // subscribe before connecting, so this is the uninteresting case.
        let mut late = shutdown.subscribe();
        shutdown.trigger();
        assert!(late.recv().await.is_ok());
    }
}
