//! BingX spot and perpetual-swap depth feeds.
//!
//! BingX frames data messages as gzip-compressed binary; text frames are
//! control traffic, including an application-level liveness probe that
//! must be answered with the venue's reply token (`pong` on spot, `Pong`
//! on swap, case demanded by the venue). The first `"all"` action is the
//! stream-born snapshot; `"update"` actions are increments carrying a
//! venue update id without a previous-id field, so `prev` chains from the
//! id seen last. Spot encodes levels as price-to-quantity maps, swap as
//! arrays.

use std::collections::HashMap;
use std::io::Read;

use async_trait::async_trait;
use chrono::Utc;
use flate2::read::GzDecoder;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sirocco_core::data::{DepthUpdate, HealthStatus, PriceLevel, Snapshot};
use sirocco_core::error::ExchangeError;
use sirocco_core::types::ExchangeId;

use crate::adapter::ExchangeAdapter;
use crate::health::HealthTracker;
use crate::symbol::dash_symbol;
use crate::ws::{self, Shutdown, WsStream, CLOSE_GRACE};
use crate::{await_snapshot, try_forward, UPDATE_CHANNEL_CAPACITY};

/// BingX market variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BingxMarket {
    /// Spot market
    Spot,
    /// Perpetual swap market
    Swap,
}

impl BingxMarket {
    fn ws_url(self) -> &'static str {
        match self {
            Self::Spot => "wss://open-api-ws.bingx.com/market",
            Self::Swap => "wss://open-api-swap.bingx.com/swap-market",
        }
    }

    /// The venue-specified reply to its liveness probe.
    fn pong_token(self) -> &'static str {
        match self {
            Self::Spot => "pong",
            Self::Swap => "Pong",
        }
    }
}

/// Adapter for BingX depth feeds.
pub struct BingxAdapter {
    market: BingxMarket,
    symbol: String,
    venue_symbol: String,
    update_tx: Option<mpsc::Sender<DepthUpdate>>,
    updates_rx: Option<mpsc::Receiver<DepthUpdate>>,
    snapshot_tx: watch::Sender<Option<Snapshot>>,
    snapshot_rx: watch::Receiver<Option<Snapshot>>,
    shutdown: Shutdown,
    health: HealthTracker,
}

impl BingxAdapter {
    /// Creates a spot adapter for the given canonical symbol.
    #[must_use]
    pub fn new_spot(symbol: &str) -> Self {
        Self::with_market(BingxMarket::Spot, symbol)
    }

    /// Creates a perpetual-swap adapter for the given canonical symbol.
    #[must_use]
    pub fn new_swap(symbol: &str) -> Self {
        Self::with_market(BingxMarket::Swap, symbol)
    }

    fn with_market(market: BingxMarket, symbol: &str) -> Self {
        let (update_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        Self {
            market,
            symbol: symbol.to_uppercase(),
            venue_symbol: dash_symbol(symbol),
            update_tx: Some(update_tx),
            updates_rx: Some(updates_rx),
            snapshot_tx,
            snapshot_rx,
            shutdown: Shutdown::new(),
            health: HealthTracker::new(),
        }
    }

    async fn run_reader(
        market: BingxMarket,
        symbol: String,
        mut stream: WsStream,
        tx: mpsc::Sender<DepthUpdate>,
        snapshot_tx: watch::Sender<Option<Snapshot>>,
        mut shutdown: broadcast::Receiver<()>,
        health: HealthTracker,
    ) {
        let exchange = match market {
            BingxMarket::Spot => ExchangeId::Bingx,
            BingxMarket::Swap => ExchangeId::Bingxf,
        };
        let mut last_id: i64 = 0;
        let mut snapshot_stored = false;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = stream.close(None).await;
                    break;
                }
                frame = stream.next() => {
                    let decoded = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Binary(bytes))) => match decode_gzip(&bytes) {
                            Ok(text) => text,
                            Err(e) => {
                                health.record_error();
                                warn!(exchange = %exchange, error = %e, "failed to decode gzip frame");
                                continue;
                            }
                        },
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            health.record_error();
                            error!(exchange = %exchange, error = %e, "websocket read error");
                            break;
                        }
                        None => break,
                    };

                    if is_liveness_probe(&decoded) {
                        let token = market.pong_token();
                        if let Err(e) = stream.send(Message::Text(token.to_string())).await {
                            warn!(exchange = %exchange, error = %e, "failed to answer liveness probe");
                        }
                        continue;
                    }

                    let payload = match parse_depth(market, &decoded) {
                        Ok(Some(payload)) => payload,
                        Ok(None) => continue,
                        Err(e) => {
                            health.record_error();
                            warn!(exchange = %exchange, error = %e, "venue error message");
                            continue;
                        }
                    };

                    health.record_message();

                    match payload.action.as_str() {
                        "all" => {
                            if snapshot_stored {
                                continue;
                            }
                            last_id = payload.last_update_id;
                            snapshot_stored = true;
                            let _ = snapshot_tx.send(Some(Snapshot {
                                exchange,
                                symbol: symbol.clone(),
                                last_update_id: payload.last_update_id,
                                bids: payload.bids,
                                asks: payload.asks,
                                timestamp: Utc::now(),
                            }));
                            debug!(exchange = %exchange, anchor = last_id, "stream snapshot stored");
                        }
                        "update" => {
                            let prev = last_id;
                            last_id = payload.last_update_id;
                            try_forward(&tx, DepthUpdate {
                                exchange,
                                symbol: symbol.clone(),
                                event_time: Utc::now(),
                                first_update_id: payload.last_update_id,
                                final_update_id: payload.last_update_id,
                                prev_update_id: prev,
                                bids: payload.bids,
                                asks: payload.asks,
                            }, exchange);
                        }
                        _ => {}
                    }
                }
            }
        }
        health.set_connected(false);
    }
}

#[async_trait]
impl ExchangeAdapter for BingxAdapter {
    fn name(&self) -> ExchangeId {
        match self.market {
            BingxMarket::Spot => ExchangeId::Bingx,
            BingxMarket::Swap => ExchangeId::Bingxf,
        }
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let Some(tx) = self.update_tx.take() else {
            return Ok(());
        };

        let mut stream = ws::connect(self.market.ws_url()).await.map_err(|e| {
            self.health.record_error();
            ExchangeError::Network(e)
        })?;

        let data_type = format!("{}@incrDepth", self.venue_symbol);
        ws::send_json(
            &mut stream,
            &SubscribeRequest {
                id: Uuid::new_v4().to_string(),
                req_type: "sub",
                data_type: data_type.clone(),
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
        info!(exchange = %self.name(), data_type = %data_type, "subscribed");

        tokio::spawn(Self::run_reader(
            self.market,
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
    id: String,
    #[serde(rename = "reqType")]
    req_type: &'static str,
    #[serde(rename = "dataType")]
    data_type: String,
}

#[derive(Debug, Deserialize)]
struct SpotMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<SpotDepth>,
}

#[derive(Debug, Deserialize)]
struct SpotDepth {
    #[serde(default)]
    action: String,
    #[serde(rename = "lastUpdateId", default)]
    last_update_id: i64,
    #[serde(default)]
    bids: HashMap<String, String>,
    #[serde(default)]
    asks: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SwapMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<SwapDepth>,
}

#[derive(Debug, Deserialize)]
struct SwapDepth {
    #[serde(default)]
    action: String,
    #[serde(rename = "lastUpdateId", default)]
    last_update_id: i64,
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

struct DepthPayload {
    action: String,
    last_update_id: i64,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

/// Parses a decoded frame into a depth payload.
///
/// Returns `Ok(None)` for non-depth traffic (acks, pongs) and an error
/// for venue error codes.
fn parse_depth(market: BingxMarket, decoded: &str) -> Result<Option<DepthPayload>, ExchangeError> {
    let exchange = match market {
        BingxMarket::Spot => ExchangeId::Bingx,
        BingxMarket::Swap => ExchangeId::Bingxf,
    };

    match market {
        BingxMarket::Spot => {
            let Ok(msg) = serde_json::from_str::<SpotMessage>(decoded) else {
                return Ok(None);
            };
            if msg.code != 0 && !msg.msg.is_empty() {
                return Err(ExchangeError::Api {
                    exchange,
                    code: msg.code.to_string(),
                    message: msg.msg,
                });
            }
            Ok(msg.data.map(|data| DepthPayload {
                action: data.action,
                last_update_id: data.last_update_id,
                bids: map_levels(data.bids),
                asks: map_levels(data.asks),
            }))
        }
        BingxMarket::Swap => {
            let Ok(msg) = serde_json::from_str::<SwapMessage>(decoded) else {
                return Ok(None);
            };
            if msg.code != 0 && !msg.msg.is_empty() {
                return Err(ExchangeError::Api {
                    exchange,
                    code: msg.code.to_string(),
                    message: msg.msg,
                });
            }
            Ok(msg.data.map(|data| DepthPayload {
                action: data.action,
                last_update_id: data.last_update_id,
                bids: array_levels(data.bids),
                asks: array_levels(data.asks),
            }))
        }
    }
}

fn map_levels(raw: HashMap<String, String>) -> Vec<PriceLevel> {
    raw.into_iter()
        .map(|(price, quantity)| PriceLevel::new(price, quantity))
        .collect()
}

fn array_levels(raw: Vec<[String; 2]>) -> Vec<PriceLevel> {
    raw.into_iter()
        .map(|[price, quantity]| PriceLevel::new(price, quantity))
        .collect()
}

fn is_liveness_probe(decoded: &str) -> bool {
    decoded == "ping" || decoded == "Ping" || decoded.contains("\"ping\"")
}

fn decode_gzip(data: &[u8]) -> Result<String, std::io::Error> {
    let mut decoder = GzDecoder::new(data);
    let mut text = String::new();
    decoder.read_to_string(&mut text)?;
    Ok(text)
}
