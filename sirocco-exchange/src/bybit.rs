//! Bybit spot and linear-futures depth feeds.
//!
//! Bybit is a stream-born snapshot venue: the first message on the
//! `orderbook` topic is a full snapshot, everything after is a delta.
//! Messages carry a native matching-engine sequence number but no
//! previous-event id, so the adapter chains `prev` from the sequence it
//! saw last.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info};

use sirocco_core::data::{DepthUpdate, HealthStatus, PriceLevel, Snapshot};
use sirocco_core::error::ExchangeError;
use sirocco_core::types::ExchangeId;

use crate::adapter::ExchangeAdapter;
use crate::health::HealthTracker;
use crate::ws::{self, Shutdown, WsStream, CLOSE_GRACE};
use crate::{await_snapshot, try_forward, UPDATE_CHANNEL_CAPACITY};

/// Bybit market variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BybitMarket {
    /// Spot market
    Spot,
    /// USDT-margined linear perpetuals
    Linear,
}

/// Adapter for Bybit depth feeds.
pub struct BybitAdapter {
    market: BybitMarket,
    symbol: String,
    ws_url: String,
    update_tx: Option<mpsc::Sender<DepthUpdate>>,
    updates_rx: Option<mpsc::Receiver<DepthUpdate>>,
    snapshot_tx: watch::Sender<Option<Snapshot>>,
    snapshot_rx: watch::Receiver<Option<Snapshot>>,
    shutdown: Shutdown,
    health: HealthTracker,
}

impl BybitAdapter {
    /// Creates a spot adapter for the given canonical symbol.
    #[must_use]
    pub fn new_spot(symbol: &str) -> Self {
        Self::with_market(BybitMarket::Spot, symbol)
    }

    /// Creates a linear-futures adapter for the given canonical symbol.
    #[must_use]
    pub fn new_linear(symbol: &str) -> Self {
        Self::with_market(BybitMarket::Linear, symbol)
    }

    fn with_market(market: BybitMarket, symbol: &str) -> Self {
        let ws_url = match market {
            BybitMarket::Spot => "wss://stream.bybit.com/v5/public/spot",
            BybitMarket::Linear => "wss://stream.bybit.com/v5/public/linear",
        };

        let (update_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        Self {
            market,
            symbol: symbol.to_uppercase(),
            ws_url: ws_url.to_string(),
            update_tx: Some(update_tx),
            updates_rx: Some(updates_rx),
            snapshot_tx,
            snapshot_rx,
            shutdown: Shutdown::new(),
            health: HealthTracker::new(),
        }
    }

    fn topic(&self) -> String {
        let depth = match self.market {
            BybitMarket::Spot => 1000,
            BybitMarket::Linear => 500,
        };
        format!("orderbook.{depth}.{}", self.symbol)
    }

    async fn run_reader(
        exchange: ExchangeId,
        symbol: String,
        mut stream: WsStream,
        tx: mpsc::Sender<DepthUpdate>,
        snapshot_tx: watch::Sender<Option<Snapshot>>,
        mut shutdown: broadcast::Receiver<()>,
        health: HealthTracker,
    ) {
        let mut last_seq: i64 = 0;
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
                            let Ok(msg) = serde_json::from_str::<BookMessage>(&text) else {
                                // Subscription acks and pongs land here.
                                continue;
                            };
                            if msg.topic.is_empty() || msg.data.symbol.is_empty() {
                                continue;
                            }

                            health.record_message();

                            if msg.kind == "snapshot" && !snapshot_stored {
                                let snapshot = Snapshot {
                                    exchange,
                                    symbol: symbol.clone(),
                                    last_update_id: msg.data.seq,
                                    bids: to_levels(&msg.data.bids),
                                    asks: to_levels(&msg.data.asks),
                                    timestamp: millis_to_utc(msg.ts),
                                };
                                last_seq = msg.data.seq;
                                snapshot_stored = true;
                                let _ = snapshot_tx.send(Some(snapshot));
                                debug!(exchange = %exchange, seq = msg.data.seq, "stream snapshot stored");
                            }

                            let prev = last_seq;
                            last_seq = msg.data.seq;

                            try_forward(&tx, DepthUpdate {
                                exchange,
                                symbol: symbol.clone(),
                                event_time: millis_to_utc(msg.ts),
                                first_update_id: msg.data.seq,
                                final_update_id: msg.data.seq,
                                prev_update_id: prev,
                                bids: to_levels(&msg.data.bids),
                                asks: to_levels(&msg.data.asks),
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
impl ExchangeAdapter for BybitAdapter {
    fn name(&self) -> ExchangeId {
        match self.market {
            BybitMarket::Spot => ExchangeId::Bybit,
            BybitMarket::Linear => ExchangeId::Bybitf,
        }
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let Some(tx) = self.update_tx.take() else {
            return Ok(());
        };

        let mut stream = ws::connect(&self.ws_url).await.map_err(|e| {
            self.health.record_error();
            ExchangeError::Network(e)
        })?;

        let topic = self.topic();
        ws::send_json(
            &mut stream,
            &SubscribeRequest {
                op: "subscribe",
                args: vec![topic.clone()],
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
        info!(exchange = %self.name(), topic = %topic, "subscribed");

        tokio::spawn(Self::run_reader(
            self.name(),
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
    op: &'static str,
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BookMessage {
    #[serde(default)]
    topic: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    ts: i64,
    #[serde(default)]
    data: BookData,
}

#[derive(Debug, Default, Deserialize)]
struct BookData {
    #[serde(rename = "s", default)]
    symbol: String,
    #[serde(rename = "b", default)]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    asks: Vec<[String; 2]>,
    #[serde(default)]
    seq: i64,
}

fn to_levels(raw: &[[String; 2]]) -> Vec<PriceLevel> {
    raw.iter()
        .map(|[price, quantity]| PriceLevel::new(price.clone(), quantity.clone()))
        .collect()
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}
