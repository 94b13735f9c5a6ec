//! Hyperliquid perpetual depth feed.
//!
//! Hyperliquid keys perpetuals by coin alone (`BTC`, not `BTCUSDT`). The
//! snapshot comes from the `info` REST endpoint and the `l2Book`
//! subscription delivers full book states stamped with the venue clock;
//! sequence ids are synthesized from one per-adapter chain shared by
//! both paths so the engine sees unbroken continuity.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info};

use sirocco_core::data::{DepthUpdate, HealthStatus, PriceLevel, Snapshot};
use sirocco_core::error::{ExchangeError, NetworkError};
use sirocco_core::types::ExchangeId;

use crate::adapter::ExchangeAdapter;
use crate::health::HealthTracker;
use crate::seq::SyntheticSequence;
use crate::symbol::coin_symbol;
use crate::ws::{self, Shutdown, WsStream, CLOSE_GRACE};
use crate::{try_forward, SNAPSHOT_TIMEOUT, UPDATE_CHANNEL_CAPACITY};

const WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
const REST_URL: &str = "https://api.hyperliquid.xyz/info";

/// Adapter for the Hyperliquid l2Book feed.
pub struct HyperliquidAdapter {
    symbol: String,
    coin: String,
    http: reqwest::Client,
    update_tx: Option<mpsc::Sender<DepthUpdate>>,
    updates_rx: Option<mpsc::Receiver<DepthUpdate>>,
    shutdown: Shutdown,
    health: HealthTracker,
    seq: Arc<SyntheticSequence>,
}

impl HyperliquidAdapter {
    /// Creates an adapter for the given canonical symbol.
    #[must_use]
    pub fn new(symbol: &str) -> Self {
        let (update_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            symbol: symbol.to_uppercase(),
            coin: coin_symbol(symbol),
            http: reqwest::Client::new(),
            update_tx: Some(update_tx),
            updates_rx: Some(updates_rx),
            shutdown: Shutdown::new(),
            health: HealthTracker::new(),
            seq: Arc::new(SyntheticSequence::new()),
        }
    }

    async fn run_reader(
        symbol: String,
        mut stream: WsStream,
        tx: mpsc::Sender<DepthUpdate>,
        seq: Arc<SyntheticSequence>,
        mut shutdown: broadcast::Receiver<()>,
        health: HealthTracker,
    ) {
        let exchange = ExchangeId::Hyperliquidf;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = stream.close(None).await;
                    break;
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(msg) = serde_json::from_str::<WsMessage>(&text) else {
                                debug!(exchange = %exchange, "skipping unparseable frame");
                                continue;
                            };

                            health.record_message();

                            if msg.channel != "l2Book" {
                                continue;
                            }
                            let Some(book) = msg.data else {
                                continue;
                            };

                            let [bids, asks] = book.levels;
                            let ids = seq.next_event(book.time);
                            try_forward(&tx, DepthUpdate {
                                exchange,
                                symbol: symbol.clone(),
                                event_time: millis_to_utc(book.time),
                                first_update_id: ids.first,
                                final_update_id: ids.final_id,
                                prev_update_id: ids.prev,
                                bids: to_levels(bids),
                                asks: to_levels(asks),
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
impl ExchangeAdapter for HyperliquidAdapter {
    fn name(&self) -> ExchangeId {
        ExchangeId::Hyperliquidf
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
                subscription: BookSubscription {
                    kind: "l2Book",
                    coin: self.coin.clone(),
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
        info!(exchange = %self.name(), coin = %self.coin, "subscribed to l2Book");

        tokio::spawn(Self::run_reader(
            self.symbol.clone(),
            stream,
            tx,
            Arc::clone(&self.seq),
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
            .post(REST_URL)
            .timeout(SNAPSHOT_TIMEOUT)
            .json(&BookSubscription {
                kind: "l2Book",
                coin: self.coin.clone(),
            })
            .send()
            .await
            .map_err(|e| {
                self.health.record_error();
                ExchangeError::Network(NetworkError::Http {
                    reason: e.to_string(),
                })
            })?;

        let body: L2Book = response.json().await.map_err(|e| {
            self.health.record_error();
            ExchangeError::MalformedPayload {
                exchange: self.name(),
                reason: e.to_string(),
            }
        })?;

        let [bids, asks] = body.levels;
        Ok(Snapshot {
            exchange: self.name(),
            symbol: self.symbol.clone(),
            last_update_id: self.seq.anchor(body.time),
            bids: to_levels(bids),
            asks: to_levels(asks),
            timestamp: millis_to_utc(body.time),
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

#[derive(Debug, Serialize)]
struct SubscribeRequest {
    method: &'static str,
    subscription: BookSubscription,
}

#[derive(Debug, Serialize)]
struct BookSubscription {
    #[serde(rename = "type")]
    kind: &'static str,
    coin: String,
}

#[derive(Debug, Deserialize)]
struct WsMessage {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    data: Option<L2Book>,
}

#[derive(Debug, Deserialize)]
struct L2Book {
    #[serde(default)]
    time: i64,
    /// `[bids, asks]`
    levels: [Vec<WsLevel>; 2],
}

#[derive(Debug, Deserialize)]
struct WsLevel {
    px: String,
    sz: String,
}

fn to_levels(raw: Vec<WsLevel>) -> Vec<PriceLevel> {
    raw.into_iter()
        .map(|level| PriceLevel::new(level.px, level.sz))
        .collect()
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_book_parsing() {
        let raw = r#"{
            "channel": "l2Book",
            "data": {
                "coin": "BTC",
                "time": 1700000000123,
                "levels": [
                    [{"px": "50000.0", "sz": "1.5", "n": 3}],
                    [{"px": "50001.0", "sz": "2.0", "n": 1}]
                ]
            }
        }"#;

        let msg: WsMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.channel, "l2Book");
        let book = msg.data.unwrap();
        assert_eq!(book.time, 1_700_000_000_123);

        let [bids, asks] = book.levels;
        assert_eq!(to_levels(bids)[0], PriceLevel::new("50000.0", "1.5"));
        assert_eq!(to_levels(asks)[0], PriceLevel::new("50001.0", "2.0"));
    }

    #[test]
    fn test_subscription_ack_skipped() {
        let raw = r#"{"channel": "subscriptionResponse", "data": null}"#;
        let msg: WsMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.channel, "subscriptionResponse");
        assert!(msg.data.is_none());
    }

    #[test]
    fn test_coin_mapping() {
        let adapter = HyperliquidAdapter::new("BTCUSDT");
        assert_eq!(adapter.symbol(), "BTCUSDT");
        assert_eq!(adapter.coin, "BTC");
    }

    #[test]
    fn test_subscription_request_shape() {
        let request = SubscribeRequest {
            method: "subscribe",
            subscription: BookSubscription {
                kind: "l2Book",
                coin: "BTC".to_string(),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["subscription"]["type"], "l2Book");
        assert_eq!(json["subscription"]["coin"], "BTC");
    }
}
