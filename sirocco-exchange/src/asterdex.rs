//! Asterdex perpetual-futures depth feed.
//!
//! Asterdex exposes a Binance-futures-compatible API surface: a REST
//! `depth` snapshot and a diff stream with native `U`/`u`/`pu` ids, so the
//! engine gets real gap detection here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info};

use sirocco_core::data::{DepthUpdate, HealthStatus, PriceLevel, Snapshot};
use sirocco_core::error::{ExchangeError, NetworkError};
use sirocco_core::types::ExchangeId;

use crate::adapter::ExchangeAdapter;
use crate::health::HealthTracker;
use crate::ws::{self, Shutdown, WsStream, CLOSE_GRACE};
use crate::{try_forward, SNAPSHOT_TIMEOUT, UPDATE_CHANNEL_CAPACITY};

/// Adapter for the Asterdex perpetual depth feed.
pub struct AsterdexAdapter {
    symbol: String,
    ws_url: String,
    rest_url: String,
    http: reqwest::Client,
    update_tx: Option<mpsc::Sender<DepthUpdate>>,
    updates_rx: Option<mpsc::Receiver<DepthUpdate>>,
    shutdown: Shutdown,
    health: HealthTracker,
}

impl AsterdexAdapter {
    /// Creates an adapter for the given canonical symbol.
    #[must_use]
    pub fn new(symbol: &str) -> Self {
        let lower = symbol.to_lowercase();
        let upper = symbol.to_uppercase();
        let (update_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            ws_url: format!("wss://fstream.asterdex.com/stream?streams={lower}@depth"),
            rest_url: format!("https://fapi.asterdex.com/fapi/v1/depth?symbol={upper}&limit=1000"),
            symbol: upper,
            http: reqwest::Client::new(),
            update_tx: Some(update_tx),
            updates_rx: Some(updates_rx),
            shutdown: Shutdown::new(),
            health: HealthTracker::new(),
        }
    }

    async fn run_reader(
        symbol: String,
        mut stream: WsStream,
        tx: mpsc::Sender<DepthUpdate>,
        mut shutdown: broadcast::Receiver<()>,
        health: HealthTracker,
    ) {
        let exchange = ExchangeId::Asterdexf;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = stream.close(None).await;
                    break;
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(envelope) = serde_json::from_str::<StreamEnvelope>(&text) else {
                                debug!(exchange = %exchange, "skipping unparseable frame");
                                continue;
                            };
                            health.record_message();

                            let event = envelope.data;
                            try_forward(&tx, DepthUpdate {
                                exchange,
                                symbol: symbol.clone(),
                                event_time: millis_to_utc(event.event_time),
                                first_update_id: event.first_update_id,
                                final_update_id: event.final_update_id,
                                prev_update_id: event.prev_update_id,
                                bids: to_levels(event.bids),
                                asks: to_levels(event.asks),
                            }, exchange);
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
impl ExchangeAdapter for AsterdexAdapter {
    fn name(&self) -> ExchangeId {
        ExchangeId::Asterdexf
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let Some(tx) = self.update_tx.take() else {
            return Ok(());
        };

        let stream = ws::connect(&self.ws_url).await.map_err(|e| {
            self.health.record_error();
            ExchangeError::Network(e)
        })?;

        self.health.set_connected(true);
        info!(exchange = %self.name(), "websocket connected");

        tokio::spawn(Self::run_reader(
            self.symbol.clone(),
            stream,
            tx,
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
        debug!(exchange = %self.name(), "fetching order book snapshot");

        let response = self
            .http
            .get(&self.rest_url)
            .timeout(SNAPSHOT_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                self.health.record_error();
                ExchangeError::Network(NetworkError::Http {
                    reason: e.to_string(),
                })
            })?;

        let body: DepthSnapshot = response.json().await.map_err(|e| {
            self.health.record_error();
            ExchangeError::MalformedPayload {
                exchange: self.name(),
                reason: e.to_string(),
            }
        })?;

        Ok(Snapshot {
            exchange: self.name(),
            symbol: self.symbol.clone(),
            last_update_id: body.last_update_id,
            bids: to_levels(body.bids),
            asks: to_levels(body.asks),
            timestamp: Utc::now(),
        })
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

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    data: DepthEvent,
}

#[derive(Debug, Deserialize)]
struct DepthEvent {
    #[serde(rename = "E", default)]
    event_time: i64,
    #[serde(rename = "U")]
    first_update_id: i64,
    #[serde(rename = "u")]
    final_update_id: i64,
    #[serde(rename = "pu", default)]
    prev_update_id: i64,
    #[serde(rename = "b", default)]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: i64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

fn to_levels(raw: Vec<[String; 2]>) -> Vec<PriceLevel> {
    raw.into_iter()
        .map(|[price, quantity]| PriceLevel::new(price, quantity))
        .collect()
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parsing_carries_native_ids() {
        let raw = r#"{
            "stream": "btcusdt@depth",
            "data": {
                "e": "depthUpdate", "E": 1700000001000, "T": 1700000000998,
                "s": "BTCUSDT", "U": 200, "u": 210, "pu": 199,
                "b": [["50000", "3"]], "a": [["50010", "0"]]
            }
        }"#;

        let envelope: StreamEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.data.first_update_id, 200);
        assert_eq!(envelope.data.final_update_id, 210);
        assert_eq!(envelope.data.prev_update_id, 199);
        assert_eq!(envelope.data.asks[0][1], "0");
    }

    #[test]
    fn test_adapter_identity() {
        let adapter = AsterdexAdapter::new("ethusdt");
        assert_eq!(adapter.name(), ExchangeId::Asterdexf);
        assert_eq!(adapter.symbol(), "ETHUSDT");
        assert!(adapter.ws_url.contains("fstream.asterdex.com"));
    }
}
