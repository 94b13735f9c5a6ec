//! Binance spot and USDT-futures depth feeds.
//!
//! Both variants are REST-snapshot venues: the book anchor comes from the
//! `depth` endpoint and the diff stream carries native update ids. The
//! futures stream additionally provides the previous-event id (`pu`);
//! spot relies on the engine's overlap rule for continuity, which is the
//! venue's documented synchronization procedure.

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

/// Binance market variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinanceMarket {
    /// Spot market
    Spot,
    /// USDT-margined perpetual futures
    UsdtFutures,
}

/// Adapter for Binance depth feeds.
pub struct BinanceAdapter {
    market: BinanceMarket,
    symbol: String,
    ws_url: String,
    rest_url: String,
    http: reqwest::Client,
    update_tx: Option<mpsc::Sender<DepthUpdate>>,
    updates_rx: Option<mpsc::Receiver<DepthUpdate>>,
    shutdown: Shutdown,
    health: HealthTracker,
}

impl BinanceAdapter {
    /// Creates a spot adapter for the given canonical symbol.
    #[must_use]
    pub fn new_spot(symbol: &str) -> Self {
        Self::with_market(BinanceMarket::Spot, symbol)
    }

    /// Creates a USDT-futures adapter for the given canonical symbol.
    #[must_use]
    pub fn new_futures(symbol: &str) -> Self {
        Self::with_market(BinanceMarket::UsdtFutures, symbol)
    }

    fn with_market(market: BinanceMarket, symbol: &str) -> Self {
        let lower = symbol.to_lowercase();
        let upper = symbol.to_uppercase();
        let (ws_url, rest_url) = match market {
            BinanceMarket::Spot => (
                format!("wss://stream.binance.com:9443/stream?streams={lower}@depth"),
                format!("https://api.binance.com/api/v3/depth?symbol={upper}&limit=5000"),
            ),
            BinanceMarket::UsdtFutures => (
                format!("wss://fstream.binance.com/stream?streams={lower}@depth"),
                format!("https://fapi.binance.com/fapi/v1/depth?symbol={upper}&limit=1000"),
            ),
        };

        let (update_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            market,
            symbol: upper,
            ws_url,
            rest_url,
            http: reqwest::Client::new(),
            update_tx: Some(update_tx),
            updates_rx: Some(updates_rx),
            shutdown: Shutdown::new(),
            health: HealthTracker::new(),
        }
    }

    /// Returns the market variant.
    #[must_use]
    pub fn market(&self) -> BinanceMarket {
        self.market
    }

    async fn run_reader(
        exchange: ExchangeId,
        symbol: String,
        mut stream: WsStream,
        tx: mpsc::Sender<DepthUpdate>,
        mut shutdown: broadcast::Receiver<()>,
        health: HealthTracker,
    ) {
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
                            let update = convert_event(exchange, &symbol, envelope.data);
                            try_forward(&tx, update, exchange);
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
impl ExchangeAdapter for BinanceAdapter {
    fn name(&self) -> ExchangeId {
        match self.market {
            BinanceMarket::Spot => ExchangeId::Binance,
            BinanceMarket::UsdtFutures => ExchangeId::Binancef,
        }
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
        info!(exchange = %self.name(), url = %self.ws_url, "websocket connected");

        tokio::spawn(Self::run_reader(
            self.name(),
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

        Ok(convert_snapshot(self.name(), &self.symbol, body))
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
    #[serde(rename = "stream", default)]
    _stream: String,
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
    /// Only present on the futures stream.
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

fn convert_event(exchange: ExchangeId, symbol: &str, event: DepthEvent) -> DepthUpdate {
    DepthUpdate {
        exchange,
        symbol: symbol.to_string(),
        event_time: millis_to_utc(event.event_time),
        first_update_id: event.first_update_id,
        final_update_id: event.final_update_id,
        prev_update_id: event.prev_update_id,
        bids: levels(event.bids),
        asks: levels(event.asks),
    }
}

fn convert_snapshot(exchange: ExchangeId, symbol: &str, snapshot: DepthSnapshot) -> Snapshot {
    Snapshot {
        exchange,
        symbol: symbol.to_string(),
        last_update_id: snapshot.last_update_id,
        bids: levels(snapshot.bids),
        asks: levels(snapshot.asks),
        timestamp: Utc::now(),
    }
}

fn levels(raw: Vec<[String; 2]>) -> Vec<PriceLevel> {
    raw.into_iter()
        .map(|[price, quantity]| PriceLevel::new(price, quantity))
        .collect()
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}
