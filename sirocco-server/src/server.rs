//! The WebSocket broadcast server.
//!
//! Three loops: a publish ticker building orderbook and stats messages
//! for every initialized book, a broadcast drainer fanning serialized
//! messages out to clients, and one reader per client parsing control
//! messages. The broadcast queue is bounded; when it is full new
//! messages are dropped rather than blocking the publisher.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use sirocco_book::{filter_bid_outliers, Aggregator, OrderBook};
use sirocco_core::config::AppConfig;
use sirocco_core::types::ExchangeId;

use crate::registry::BookRegistry;
use crate::ws::connection::ClientRegistry;
use crate::ws::handler::ws_handler;
use crate::ws::message::{ServerMessage, WireLevel};

/// State shared by the server loops and per-client handlers.
pub struct ServerState {
    /// Live order books keyed by venue
    pub registry: Arc<BookRegistry>,
    /// Connected streaming clients
    pub clients: ClientRegistry,
    /// Tick aggregator shared by all published books
    pub aggregator: Arc<Aggregator>,
    /// Symbol-change requests toward the orchestrator; capacity one,
    /// redundant requests coalesce
    pub symbol_tx: mpsc::Sender<String>,
}

/// WebSocket broadcast server.
pub struct BroadcastServer {
    state: Arc<ServerState>,
    broadcast_tx: mpsc::Sender<ServerMessage>,
    broadcast_rx: mpsc::Receiver<ServerMessage>,
    publish_interval: Duration,
}

impl BroadcastServer {
    /// Creates the server around the shared registry and aggregator.
    #[must_use]
    pub fn new(
        registry: Arc<BookRegistry>,
        aggregator: Arc<Aggregator>,
        symbol_tx: mpsc::Sender<String>,
        app: &AppConfig,
    ) -> Self {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(app.broadcast_queue_capacity);
        Self {
            state: Arc::new(ServerState {
                registry,
                clients: ClientRegistry::new(),
                aggregator,
                symbol_tx,
            }),
            broadcast_tx,
            broadcast_rx,
            publish_interval: app.publish_interval,
        }
    }

    /// Returns a handle to the shared server state.
    #[must_use]
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Binds the listener and runs until the process exits.
    ///
    /// # Errors
    ///
    /// Returns the bind or accept error; a listen failure is fatal to the
    /// process.
    pub async fn run(self, addr: &str) -> std::io::Result<()> {
        tokio::spawn(publish_loop(
            Arc::clone(&self.state),
            self.broadcast_tx.clone(),
            self.publish_interval,
        ));
        tokio::spawn(broadcast_loop(Arc::clone(&self.state), self.broadcast_rx));

        let router = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(self.state);

        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "websocket server listening");
        axum::serve(listener, router).await
    }
}

/// Builds orderbook and stats messages for every initialized book on a
/// fixed cadence.
async fn publish_loop(
    state: Arc<ServerState>,
    tx: mpsc::Sender<ServerMessage>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        if state.clients.is_empty() {
            continue;
        }

        let timestamp = Utc::now().timestamp_millis();
        for (exchange, book) in state.registry.entries() {
            if !book.is_initialized() {
                continue;
            }

            enqueue(
                &tx,
                build_orderbook_message(exchange, &book, &state.aggregator, timestamp),
            );
            enqueue(&tx, ServerMessage::stats(exchange, &book.stats(), timestamp));
        }
    }
}

fn enqueue(tx: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    use tokio::sync::mpsc::error::TrySendError;

    match tx.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!("broadcast queue full, dropping message"),
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Drains the broadcast queue, serializing each message once and fanning
/// it out to every client.
async fn broadcast_loop(state: Arc<ServerState>, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(message) = rx.recv().await {
        match serde_json::to_string(&message) {
            Ok(json) => {
                let payload: Arc<str> = Arc::from(json);
                state.clients.broadcast(&payload);
            }
            Err(e) => error!(error = %e, "failed to serialize outbound message"),
        }
    }
}

/// Builds the aggregated orderbook message for one venue.
///
/// Bids are sorted price descending, asks ascending, and each level
/// carries the running cumulative quantity in its sort order.
#[must_use]
pub fn build_orderbook_message(
    exchange: ExchangeId,
    book: &OrderBook,
    aggregator: &Aggregator,
    timestamp: i64,
) -> ServerMessage {
    let stats = book.stats();
    let raw_bids = filter_bid_outliers(book.bids(), stats.best_ask);
    let raw_asks = book.asks();

    let bid_buckets = aggregator.aggregate_bids(&raw_bids);
    let ask_buckets = aggregator.aggregate_asks(&raw_asks);

    ServerMessage::Orderbook {
        exchange,
        timestamp,
        bids: cumulative_levels(bid_buckets.iter().rev()),
        asks: cumulative_levels(ask_buckets.iter()),
    }
}

fn cumulative_levels<'a>(
    levels: impl Iterator<Item = (&'a Decimal, &'a Decimal)>,
) -> Vec<WireLevel> {
    let mut cumulative = Decimal::ZERO;
    levels
        .map(|(price, quantity)| {
            cumulative += *quantity;
            WireLevel {
                price: price.to_string(),
                quantity: quantity.to_string(),
                cumulative: cumulative.to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sirocco_core::data::{PriceLevel, Snapshot};
    use sirocco_core::types::TickSize;
    use std::str::FromStr;

    fn initialized_book(bids: &[(&str, &str)], asks: &[(&str, &str)]) -> OrderBook {
        let book = OrderBook::new();
        book.load_snapshot(&Snapshot {
            exchange: ExchangeId::Binance,
            symbol: "BTCUSDT".to_string(),
            last_update_id: 1,
            bids: bids.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect(),
            asks: asks.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect(),
            timestamp: Utc::now(),
        })
        .unwrap();
        book.process_buffered_events();
        book
    }

    #[test]
    fn test_orderbook_message_sorting_and_cumulative() {
        let book = initialized_book(
            &[("50000", "1"), ("49990", "2"), ("49980", "4")],
            &[("50010", "1"), ("50020", "2")],
        );
        let aggregator = Aggregator::new(TickSize::T01);

        let message =
            build_orderbook_message(ExchangeId::Binance, &book, &aggregator, 1_700_000_000_000);
        let ServerMessage::Orderbook { bids, asks, .. } = message else {
            panic!("expected orderbook message");
        };

        let bid_prices: Vec<Decimal> = bids
            .iter()
            .map(|l| Decimal::from_str(&l.price).unwrap())
            .collect();
        assert_eq!(bid_prices, vec![dec!(50000.0), dec!(49990.0), dec!(49980.0)]);

        let bid_cumulative: Vec<Decimal> = bids
            .iter()
            .map(|l| Decimal::from_str(&l.cumulative).unwrap())
            .collect();
        assert_eq!(bid_cumulative, vec![dec!(1), dec!(3), dec!(7)]);

        let ask_prices: Vec<Decimal> = asks
            .iter()
            .map(|l| Decimal::from_str(&l.price).unwrap())
            .collect();
        assert_eq!(ask_prices, vec![dec!(50010.0), dec!(50020.0)]);
    }

    #[test]
    fn test_tick_bucketing_merges_levels() {
        let book = initialized_book(
            &[("50001", "1"), ("50005", "1.5"), ("50009", "2")],
            &[("50001", "1"), ("50009", "2")],
        );
        let aggregator = Aggregator::new(TickSize::T10);

        let message = build_orderbook_message(ExchangeId::Binance, &book, &aggregator, 0);
        let ServerMessage::Orderbook { bids, asks, .. } = message else {
            panic!("expected orderbook message");
        };

        assert_eq!(bids.len(), 1);
        assert_eq!(Decimal::from_str(&bids[0].price).unwrap(), dec!(50000));
        assert_eq!(Decimal::from_str(&bids[0].quantity).unwrap(), dec!(4.5));

        assert_eq!(asks.len(), 1);
        assert_eq!(Decimal::from_str(&asks[0].price).unwrap(), dec!(50010));
        assert_eq!(Decimal::from_str(&asks[0].quantity).unwrap(), dec!(3));
    }

    #[test]
    fn test_outlier_bids_filtered_from_published_book() {
        // A residual bid at a fifth of the market never reaches clients.
        let book = initialized_book(&[("50000", "1"), ("9000", "10")], &[("50010", "1")]);
        let aggregator = Aggregator::new(TickSize::T1);

        let message = build_orderbook_message(ExchangeId::Coinbase, &book, &aggregator, 0);
        let ServerMessage::Orderbook { bids, .. } = message else {
            panic!("expected orderbook message");
        };

        assert_eq!(bids.len(), 1);
        assert_eq!(Decimal::from_str(&bids[0].price).unwrap(), dec!(50000));
    }

    #[test]
    fn test_published_spread_never_crossed_by_bucketing() {
        let book = initialized_book(&[("50007", "1")], &[("50012", "1")]);
        let aggregator = Aggregator::new(TickSize::T50);

        let message = build_orderbook_message(ExchangeId::Binance, &book, &aggregator, 0);
        let ServerMessage::Orderbook { bids, asks, .. } = message else {
            panic!("expected orderbook message");
        };

        let published_bid = Decimal::from_str(&bids[0].price).unwrap();
        let published_ask = Decimal::from_str(&asks[0].price).unwrap();
        assert!(published_bid <= dec!(50007));
        assert!(published_ask >= dec!(50012));
        assert!(published_bid <= published_ask);
    }
}
