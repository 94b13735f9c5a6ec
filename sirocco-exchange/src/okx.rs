//! OKX spot depth via REST polling.
//!
//! OKX has no stream here: the adapter ticks once per second, pulls the
//! full `books-full` snapshot and emits it as a full-replacement depth
//! update with synthetic sequence ids. Gap detection degenerates to
//! always-in-sequence, which is fine for a feed that is a self-healing
//! full snapshot every tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use sirocco_core::data::{DepthUpdate, HealthStatus, PriceLevel, Snapshot};
use sirocco_core::error::{ExchangeError, NetworkError};
use sirocco_core::types::ExchangeId;

use crate::adapter::ExchangeAdapter;
use crate::health::HealthTracker;
use crate::seq::SyntheticSequence;
use crate::symbol::dash_symbol;
use crate::ws::Shutdown;
use crate::{try_forward, SNAPSHOT_TIMEOUT, UPDATE_CHANNEL_CAPACITY};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Adapter polling the OKX full order book endpoint.
pub struct OkxAdapter {
    symbol: String,
    inst_id: String,
    rest_url: String,
    http: reqwest::Client,
    update_tx: Option<mpsc::Sender<DepthUpdate>>,
    updates_rx: Option<mpsc::Receiver<DepthUpdate>>,
    shutdown: Shutdown,
    health: HealthTracker,
    seq: Arc<SyntheticSequence>,
}

impl OkxAdapter {
    /// Creates an adapter for the given canonical symbol.
    #[must_use]
    pub fn new(symbol: &str) -> Self {
        let inst_id = dash_symbol(symbol);
        let (update_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            symbol: symbol.to_uppercase(),
            rest_url: format!(
                "https://www.okx.com/api/v5/market/books-full?instId={inst_id}&sz=5000"
            ),
            inst_id,
            http: reqwest::Client::new(),
            update_tx: Some(update_tx),
            updates_rx: Some(updates_rx),
            shutdown: Shutdown::new(),
            health: HealthTracker::new(),
            seq: Arc::new(SyntheticSequence::new()),
        }
    }

    async fn run_poller(
        symbol: String,
        rest_url: String,
        http: reqwest::Client,
        tx: mpsc::Sender<DepthUpdate>,
        seq: Arc<SyntheticSequence>,
        mut shutdown: broadcast::Receiver<()>,
        health: HealthTracker,
    ) {
        let exchange = ExchangeId::Okx;
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    match fetch_book(&http, &rest_url, POLL_TIMEOUT).await {
                        Ok(book) => {
                            health.record_message();
                            let ids = seq.next_event(book.ts_millis);
                            try_forward(&tx, DepthUpdate {
                                exchange,
                                symbol: symbol.clone(),
                                event_time: Utc::now(),
                                first_update_id: ids.first,
                                final_update_id: ids.final_id,
                                prev_update_id: ids.prev,
                                bids: book.bids,
                                asks: book.asks,
                            }, exchange);
                        }
                        Err(e) => {
                            health.record_error();
                            warn!(exchange = %exchange, error = %e, "poll failed");
                        }
                    }
                }
            }
        }
        health.set_connected(false);
    }
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn name(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let Some(tx) = self.update_tx.take() else {
            return Ok(());
        };

        self.health.set_connected(true);
        info!(
            exchange = %self.name(),
            inst_id = %self.inst_id,
            interval = ?POLL_INTERVAL,
            "starting REST polling"
        );

        tokio::spawn(Self::run_poller(
            self.symbol.clone(),
            self.rest_url.clone(),
            self.http.clone(),
            tx,
            Arc::clone(&self.seq),
            self.shutdown.subscribe(),
            self.health.clone(),
        ));

        Ok(())
    }

    async fn close(&mut self) {
        self.shutdown.trigger();
        self.health.set_connected(false);
        debug!(exchange = %self.name(), "polling stopped");
    }

    async fn snapshot(&self) -> Result<Snapshot, ExchangeError> {
        let book = fetch_book(&self.http, &self.rest_url, SNAPSHOT_TIMEOUT)
            .await
            .map_err(|e| {
                self.health.record_error();
                e
            })?;

        Ok(Snapshot {
            exchange: self.name(),
            symbol: self.symbol.clone(),
            last_update_id: self.seq.anchor(book.ts_millis),
            bids: book.bids,
            asks: book.asks,
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

struct FetchedBook {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    ts_millis: i64,
}

async fn fetch_book(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<FetchedBook, ExchangeError> {
    let exchange = ExchangeId::Okx;

    let response = http
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            ExchangeError::Network(NetworkError::Http {
                reason: e.to_string(),
            })
        })?;

    let body: BookResponse = response
        .json()
        .await
        .map_err(|e| ExchangeError::MalformedPayload {
            exchange,
            reason: e.to_string(),
        })?;

    if body.code != "0" {
        return Err(ExchangeError::Api {
            exchange,
            code: body.code,
            message: body.msg,
        });
    }

    let Some(data) = body.data.into_iter().next() else {
        return Err(ExchangeError::MalformedPayload {
            exchange,
            reason: "empty response data".to_string(),
        });
    };

    let ts_millis = data.ts.parse().unwrap_or_else(|_| {
        error!(exchange = %exchange, ts = %data.ts, "unparseable timestamp");
        Utc::now().timestamp_millis()
    });

    Ok(FetchedBook {
        bids: to_levels(data.bids),
        asks: to_levels(data.asks),
        ts_millis,
    })
}

#[derive(Debug, Deserialize)]
struct BookResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<BookData>,
}

#[derive(Debug, Deserialize)]
struct BookData {
    /// Entries are `[price, quantity, deprecated, order_count]`.
    #[serde(default)]
    bids: Vec<Vec<String>>,
    #[serde(default)]
    asks: Vec<Vec<String>>,
    #[serde(default)]
    ts: String,
}

fn to_levels(raw: Vec<Vec<String>>) -> Vec<PriceLevel> {
    raw.into_iter()
        .filter(|entry| entry.len() >= 2)
        .map(|mut entry| {
            let quantity = entry.swap_remove(1);
            let price = entry.swap_remove(0);
            PriceLevel::new(price, quantity)
        })
        .collect()
}
