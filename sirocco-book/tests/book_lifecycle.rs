//! End-to-end engine scenarios: bootstrap with buffered events, gap
//! recovery through the reinitialization policy, and aggregation of a
//! live book.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use sirocco_book::{Aggregator, OrderBook};
use sirocco_core::data::{DepthUpdate, PriceLevel, Snapshot};
use sirocco_core::types::{ExchangeId, TickSize};

fn levels(pairs: &[(&str, &str)]) -> Vec<PriceLevel> {
    pairs
        .iter()
        .map(|(price, qty)| PriceLevel::new(*price, *qty))
        .collect()
}

fn snapshot(last_update_id: i64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> Snapshot {
    Snapshot {
        exchange: ExchangeId::Binancef,
        symbol: "BTCUSDT".to_string(),
        last_update_id,
        bids: levels(bids),
        asks: levels(asks),
        timestamp: Utc::now(),
    }
}

fn update(first: i64, last: i64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DepthUpdate {
    DepthUpdate {
        exchange: ExchangeId::Binancef,
        symbol: "BTCUSDT".to_string(),
        event_time: Utc::now(),
        first_update_id: first,
        final_update_id: last,
        prev_update_id: first - 1,
        bids: levels(bids),
        asks: levels(asks),
    }
}

#[test]
fn bootstrap_replays_buffer_and_tracks_live_stream() {
    let book = OrderBook::new();

    // Stream starts before the snapshot arrives.
    book.handle_depth_update(update(95, 98, &[("49980", "5")], &[]));
    book.handle_depth_update(update(99, 101, &[("50001", "1")], &[("50009", "2")]));
    book.handle_depth_update(update(102, 102, &[("50002", "1.5")], &[]));
    assert_eq!(book.buffered_len(), 3);

    book.load_snapshot(&snapshot(
        100,
        &[("50000", "2"), ("49990", "1")],
        &[("50010", "1")],
    ))
    .unwrap();
    book.process_buffered_events();

    assert!(book.is_initialized());
    assert_eq!(book.last_update_id(), 102);

    // The stale pre-snapshot level must not exist; the replayed ones must.
    assert!(!book.bids().iter().any(|(p, _)| *p == dec!(49980)));
    let stats = book.stats();
    assert_eq!(stats.best_bid, dec!(50002));
    assert_eq!(stats.best_ask, dec!(50009));

    // The live stream continues in sequence.
    book.handle_depth_update(update(103, 104, &[("50002", "0")], &[("50009", "0")]));
    let stats = book.stats();
    assert_eq!(stats.best_bid, dec!(50001));
    assert_eq!(stats.best_ask, dec!(50010));
    assert_eq!(stats.spread, dec!(9));
}

#[test]
fn gap_storm_recovers_through_reinitialization() {
    let book = OrderBook::new();
    book.load_snapshot(&snapshot(100, &[("50000", "2")], &[("50010", "1")]))
        .unwrap();
    book.process_buffered_events();

    // A burst of far-future updates the book cannot apply.
    for i in 0..101i64 {
        let first = 10_000 + i * 5;
        book.handle_depth_update(update(first, first + 1, &[("50100", "1")], &[]));
    }
    assert!(book.needs_reinit(100));
    assert_eq!(book.stats().best_bid, dec!(50000), "gapped updates never applied");

    // The policy refetches a snapshot ahead of the buffered range and
    // replays; stale buffer entries are discarded.
    book.mark_uninitialized();
    book.load_snapshot(&snapshot(10_600, &[("50200", "3")], &[("50210", "1")]))
        .unwrap();
    book.process_buffered_events();

    assert!(book.is_initialized());
    assert_eq!(book.buffered_len(), 0);
    assert_eq!(book.stats().best_bid, dec!(50200));

    let anchor = book.last_update_id();
    book.handle_depth_update(update(anchor + 1, anchor + 2, &[("50205", "1")], &[]));
    assert_eq!(book.stats().best_bid, dec!(50205));
}

#[test]
fn aggregated_view_of_live_book_preserves_spread() {
    let book = OrderBook::new();
    book.load_snapshot(&snapshot(
        1,
        &[("50007.3", "1"), ("50003.1", "2"), ("49998.8", "4")],
        &[("50012.8", "1"), ("50018.4", "3")],
    ))
    .unwrap();
    book.process_buffered_events();

    let stats = book.stats();
    let aggregator = Aggregator::new(TickSize::T10);
    let bids = aggregator.aggregate_bids(&book.bids());
    let asks = aggregator.aggregate_asks(&book.asks());

    let published_bid = *bids.last_key_value().unwrap().0;
    let published_ask = *asks.first_key_value().unwrap().0;
    assert!(published_bid <= stats.best_bid);
    assert!(published_ask >= stats.best_ask);

    // Bucketed quantities account for every raw level.
    let bucket_total: Decimal = bids.values().copied().sum();
    assert_eq!(bucket_total, stats.total_bids_qty);
}
