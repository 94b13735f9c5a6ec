//! Kraken spot depth feed.
//!
//! Kraken's v2 book channel is a stream-born snapshot venue that quotes
//! prices as JSON numbers and exposes no sequence ids; the adapter
//! renders levels back to fixed-precision text and synthesizes the id
//! chain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use sirocco_core::data::{DepthUpdate, HealthStatus, PriceLevel, Snapshot};
use sirocco_core::error::ExchangeError;
use sirocco_core::types::ExchangeId;

use crate::adapter::ExchangeAdapter;
use crate::health::HealthTracker;
use crate::seq::SyntheticSequence;
use crate::symbol::slash_symbol;
use crate::ws::{self, Shutdown, WsStream, CLOSE_GRACE};
use crate::{await_snapshot, try_forward, UPDATE_CHANNEL_CAPACITY};

const WS_URL: &str = "wss://ws.kraken.com/v2";
const BOOK_DEPTH: u32 = 1000;

/// Adapter for the Kraken spot book channel.
pub struct KrakenAdapter {
    symbol: String,
    venue_symbol: String,
    update_tx: Option<mpsc::Sender<DepthUpdate>>,
    updates_rx: Option<mpsc::Receiver<DepthUpdate>>,
    snapshot_tx: watch::Sender<Option<Snapshot>>,
    snapshot_rx: watch::Receiver<Option<Snapshot>>,
    shutdown: Shutdown,
    health: HealthTracker,
}

impl KrakenAdapter {
    /// Creates an adapter for the given canonical symbol.
    #[must_use]
    pub fn new(symbol: &str) -> Self {
        let (update_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        Self {
            symbol: symbol.to_uppercase(),
            venue_symbol: slash_symbol(symbol),
            update_tx: Some(update_tx),
            updates_rx: Some(updates_rx),
            snapshot_tx,
            snapshot_rx,
            shutdown: Shutdown::new(),
            health: HealthTracker::new(),
        }
    }

    async fn run_reader(
        symbol: String,
        mut stream: WsStream,
        tx: mpsc::Sender<DepthUpdate>,
        snapshot_tx: watch::Sender<Option<Snapshot>>,
        mut shutdown: broadcast::Receiver<()>,
        health: HealthTracker,
    ) {
        let exchange = ExchangeId::Kraken;
        let seq = SyntheticSequence::new();
        let mut snapshot_stored = false;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = stream.close(None).await;
                    break;
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(ack) = serde_json::from_str::<SubscribeAck>(&text) {
                                if ack.method.as_deref() == Some("subscribe") {
                                    if !ack.success {
                                        warn!(exchange = %exchange, error = ?ack.error, "subscription rejected");
                                        health.record_error();
                                    }
                                    continue;
                                }
                            }

                            let Ok(msg) = serde_json::from_str::<BookMessage>(&text) else {
                                debug!(exchange = %exchange, "skipping unparseable frame");
                                continue;
                            };
                            if msg.channel != "book" || msg.data.is_empty() {
                                continue;
                            }

                            health.record_message();
                            let book = &msg.data[0];
                            let event_time = book
                                .timestamp
                                .as_deref()
                                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                                .map_or_else(Utc::now, |ts| ts.with_timezone(&Utc));

                            if msg.kind == "snapshot" && !snapshot_stored {
                                let anchor = seq.anchor(event_time.timestamp_millis());
                                let snapshot = Snapshot {
                                    exchange,
                                    symbol: symbol.clone(),
                                    last_update_id: anchor,
                                    bids: to_levels(&book.bids),
                                    asks: to_levels(&book.asks),
                                    timestamp: event_time,
                                };
                                snapshot_stored = true;
                                let _ = snapshot_tx.send(Some(snapshot));
                                debug!(exchange = %exchange, anchor, "stream snapshot stored");
                                continue;
                            }

                            if msg.kind == "update" {
                                let ids = seq.next_event(event_time.timestamp_millis());
                                try_forward(&tx, DepthUpdate {
                                    exchange,
                                    symbol: symbol.clone(),
                                    event_time,
                                    first_update_id: ids.first,
                                    final_update_id: ids.final_id,
                                    prev_update_id: ids.prev,
                                    bids: to_levels(&book.bids),
                                    asks: to_levels(&book.asks),
                                }, exchange);
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            health.record_error();
                            error!(exchange = %exchange, error = %e, "websocket read error");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
        health.set_connected(false);
    }
}

#[async_trait]
impl ExchangeAdapter for KrakenAdapter {
    fn name(&self) -> ExchangeId {
        ExchangeId::Kraken
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let Some(tx) = self.update_tx.take() else {
            return Ok(());
        };

        let mut stream = ws::connect(WS_URL).await.map_err(|e| {
            self.health.record_error();
            ExchangeError::Network(e)
        })?;

        ws::send_json(
            &mut stream,
            &SubscribeRequest {
                method: "subscribe",
                params: SubscribeParams {
                    channel: "book",
                    symbol: vec![self.venue_symbol.clone()],
                    depth: BOOK_DEPTH,
                    snapshot: true,
                },
            },
        )
        .await
        .map_err(|e| {
            self.health.record_error();
            ExchangeError::Subscription {
                exchange: self.name(),
                reason: e.to_string(),
            }
        })?;

        self.health.set_connected(true);
        info!(exchange = %self.name(), symbol = %self.venue_symbol, "subscribed to book channel");

        tokio::spawn(Self::run_reader(
            self.symbol.clone(),
            stream,
            tx,
            self.snapshot_tx.clone(),
            self.shutdown.subscribe(),
            self.health.clone(),
        ));

        Ok(())
    }

    async fn close(&mut self) {
        self.shutdown.trigger();
        tokio::time::sleep(CLOSE_GRACE).await;
        self.health.set_connected(false);
    }

    async fn snapshot(&self) -> Result<Snapshot, ExchangeError> {
        debug!(exchange = %self.name(), "waiting for stream snapshot");
        await_snapshot(self.snapshot_rx.clone(), self.name()).await
    }

    fn take_updates(&mut self) -> Option<mpsc::Receiver<DepthUpdate>> {
        self.updates_rx.take()
    }

    fn is_connected(&self) -> bool {
        self.health.is_connected()
    }

    fn health(&self) -> HealthStatus {
        self.health.status()
    }
}

#[derive(Debug, Serialize)]
struct SubscribeRequest {
    method: &'static str,
    params: SubscribeParams,
}

#[derive(Debug, Serialize)]
struct SubscribeParams {
    channel: &'static str,
    symbol: Vec<String>,
    depth: u32,
    snapshot: bool,
}

#[derive(Debug, Deserialize)]
struct SubscribeAck {
    method: Option<String>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookMessage {
    #[serde(default)]
    channel: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: Vec<BookData>,
}

#[derive(Debug, Deserialize)]
struct BookData {
    #[serde(default)]
    bids: Vec<PriceQty>,
    #[serde(default)]
    asks: Vec<PriceQty>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceQty {
    price: f64,
    qty: f64,
}

fn to_levels(raw: &[PriceQty]) -> Vec<PriceLevel> {
    raw.iter()
        .map(|level| {
            PriceLevel::new(
                format!("{:.10}", level.price),
                format!("{:.10}", level.qty),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn test_update_message_parsing() {
        let raw = r#"{
            "channel": "book",
            "type": "update",
            "data": [{
                "symbol": "BTC/USD",
                "bids": [{"price": 50000.1, "qty": 1.5}],
                "asks": [{"price": 50001.2, "qty": 0.0}],
                "checksum": 123456,
                "timestamp": "2023-11-14T22:13:20.000000Z"
            }]
        }"#;

        let msg: BookMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind, "update");

        let levels = to_levels(&msg.data[0].bids);
        let price = Decimal::from_str(&levels[0].price).unwrap();
        assert_eq!(price, Decimal::from_str("50000.1").unwrap());

        // Zero quantities survive formatting as removals.
        let asks = to_levels(&msg.data[0].asks);
        assert!(Decimal::from_str(&asks[0].quantity).unwrap().is_zero());
    }

    #[test]
    fn test_subscription_ack_detected() {
        let raw = r#"{"method":"subscribe","success":true,"result":{"channel":"book","symbol":"BTC/USD","depth":1000,"snapshot":true}}"#;
        let ack: SubscribeAck = serde_json::from_str(raw).unwrap();
        assert_eq!(ack.method.as_deref(), Some("subscribe"));
        assert!(ack.success);
    }

    #[test]
    fn test_venue_symbol_mapping() {
        let adapter = KrakenAdapter::new("BTCUSDT");
        assert_eq!(adapter.symbol(), "BTCUSDT");
        assert_eq!(adapter.venue_symbol, "BTC/USD");
    }
}
