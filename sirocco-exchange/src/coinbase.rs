//! Coinbase Advanced Trade spot depth feed.
//!
//! The level2 channel is a stream-born snapshot venue without sequence
//! ids. Its initial snapshot is very wide, so levels farther than half the
//! derived mid price are pruned before the snapshot is handed to the
//! engine.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info};

use sirocco_core::data::{DepthUpdate, HealthStatus, PriceLevel, Snapshot};
use sirocco_core::error::ExchangeError;
use sirocco_core::types::ExchangeId;

use crate::adapter::ExchangeAdapter;
use crate::health::HealthTracker;
use crate::seq::SyntheticSequence;
use crate::symbol::dash_usd_symbol;
use crate::ws::{self, Shutdown, WsStream, CLOSE_GRACE};
use crate::{await_snapshot, try_forward, UPDATE_CHANNEL_CAPACITY};

const WS_URL: &str = "wss://advanced-trade-ws.coinbase.com";

/// Adapter for the Coinbase level2 channel.
pub struct CoinbaseAdapter {
    symbol: String,
    product_id: String,
    update_tx: Option<mpsc::Sender<DepthUpdate>>,
    updates_rx: Option<mpsc::Receiver<DepthUpdate>>,
    snapshot_tx: watch::Sender<Option<Snapshot>>,
    snapshot_rx: watch::Receiver<Option<Snapshot>>,
    shutdown: Shutdown,
    health: HealthTracker,
}

impl CoinbaseAdapter {
    /// Creates an adapter for the given canonical symbol.
    #[must_use]
    pub fn new(symbol: &str) -> Self {
        let (update_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        Self {
            symbol: symbol.to_uppercase(),
            product_id: dash_usd_symbol(symbol),
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
        let exchange = ExchangeId::Coinbase;
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
                            let Ok(msg) = serde_json::from_str::<WsMessage>(&text) else {
                                continue;
                            };
                            if msg.channel != "l2_data" || msg.events.is_empty() {
                                continue;
                            }

                            health.record_message();
                            let event = &msg.events[0];

                            if event.kind == "snapshot" && !snapshot_stored {
                                let now = Utc::now();
                                let (bids, asks) = split_sides(&event.updates, true);
                                let (bids, asks) = prune_by_distance(bids, asks);
                                let anchor = seq.anchor(now.timestamp_millis());
                                snapshot_stored = true;
                                let _ = snapshot_tx.send(Some(Snapshot {
                                    exchange,
                                    symbol: symbol.clone(),
                                    last_update_id: anchor,
                                    bids,
                                    asks,
                                    timestamp: now,
                                }));
                                debug!(exchange = %exchange, anchor, "stream snapshot stored");
                            }

                            if event.kind == "update" {
                                let now = Utc::now();
                                let (bids, asks) = split_sides(&event.updates, false);
                                let ids = seq.next_event(now.timestamp_millis());
                                try_forward(&tx, DepthUpdate {
                                    exchange,
                                    symbol: symbol.clone(),
                                    event_time: now,
                                    first_update_id: ids.first,
                                    final_update_id: ids.final_id,
                                    prev_update_id: ids.prev,
                                    bids,
                                    asks,
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
impl ExchangeAdapter for CoinbaseAdapter {
    fn name(&self) -> ExchangeId {
        ExchangeId::Coinbase
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
                kind: "subscribe",
                product_ids: vec![self.product_id.clone()],
                channel: "level2",
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
        info!(exchange = %self.name(), product_id = %self.product_id, "subscribed to level2");

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
    #[serde(rename = "type")]
    kind: &'static str,
    product_ids: Vec<String>,
    channel: &'static str,
}

#[derive(Debug, Deserialize)]
struct WsMessage {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    updates: Vec<LevelUpdate>,
}

#[derive(Debug, Deserialize)]
struct LevelUpdate {
    #[serde(default)]
    side: String,
    #[serde(default)]
    price_level: String,
    #[serde(default)]
    new_quantity: String,
}

/// Sorts raw level updates into bid and ask vectors. Snapshots drop
/// zero-quantity entries; incremental updates keep them as removals.
fn split_sides(updates: &[LevelUpdate], drop_zero: bool) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
    let mut bids = Vec::new();
    let mut asks = Vec::new();

    for update in updates {
        if drop_zero && update.new_quantity == "0" {
            continue;
        }
        let level = PriceLevel::new(update.price_level.clone(), update.new_quantity.clone());
        match update.side.as_str() {
            "bid" => bids.push(level),
            "ask" | "offer" => asks.push(level),
            _ => {}
        }
    }

    (bids, asks)
}

/// Prunes snapshot levels farther than half the derived mid price.
///
/// The level2 snapshot reaches practically from zero to infinity; the
/// engine tolerates outliers but there is no point carrying them.
fn prune_by_distance(
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
    if bids.is_empty() || asks.is_empty() {
        return (bids, asks);
    }

    let best_bid = bids
        .iter()
        .filter_map(|l| Decimal::from_str(&l.price).ok())
        .max()
        .unwrap_or(Decimal::ZERO);
    let best_ask = asks
        .iter()
        .filter_map(|l| Decimal::from_str(&l.price).ok())
        .min()
        .unwrap_or(Decimal::ZERO);
    if best_bid.is_zero() || best_ask.is_zero() {
        return (bids, asks);
    }

    let mid = (best_bid + best_ask) / Decimal::TWO;
    let max_distance = mid / Decimal::TWO;

    let bids = bids
        .into_iter()
        .filter(|l| match Decimal::from_str(&l.price) {
            Ok(price) => mid - price <= max_distance,
            Err(_) => false,
        })
        .collect();
    let asks = asks
        .into_iter()
        .filter(|l| match Decimal::from_str(&l.price) {
            Ok(price) => price - mid <= max_distance,
            Err(_) => false,
        })
        .collect();

    (bids, asks)
}
