//! Real-time order book state with gap detection and buffered catch-up.

use std::collections::BTreeMap;
use std::str::FromStr;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use sirocco_core::data::{BookStats, DepthUpdate, Snapshot};
use sirocco_core::error::DataError;

/// Per-exchange order book.
///
/// All mutation goes through an internal write lock; readers receive
/// shallow copies of the current state. The two sides are kept as ordered
/// maps keyed by exact decimal price, so the best bid is the last bid key
/// and the best ask is the first ask key with no cache to invalidate.
///
/// # Lifecycle
///
/// A book starts empty and uninitialized. [`OrderBook::load_snapshot`]
/// seeds the maps and the sequence anchor, and
/// [`OrderBook::process_buffered_events`] replays whatever arrived in the
/// meantime and flips the book initialized. The reinitialization policy
/// may later push it back to uninitialized when the stream and the book
/// have diverged beyond the forward tolerance.
#[derive(Debug, Default)]
pub struct OrderBook {
    inner: RwLock<BookState>,
}

#[derive(Debug, Default)]
struct BookState {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update_id: i64,
    event_buffer: Vec<DepthUpdate>,
    initialized: bool,
    stats: BookStats,
}

impl OrderBook {
    /// Creates a new, empty, uninitialized order book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the book from a venue snapshot.
    ///
    /// Resets both sides, re-keys every level by its exact decimal price,
    /// drops zero-quantity entries and adopts the snapshot's sequence
    /// anchor. Does not flip the book initialized; that is the job of
    /// [`OrderBook::process_buffered_events`].
    ///
    /// # Errors
    ///
    /// Returns [`DataError`] if any price or quantity fails to parse, or
    /// if the snapshot is crossed (best bid at or above best ask). The
    /// book stays uninitialized in either case and a fresh snapshot is
    /// required.
    pub fn load_snapshot(&self, snapshot: &Snapshot) -> Result<(), DataError> {
        let mut state = self.inner.write();

        state.last_update_id = snapshot.last_update_id;
        state.bids.clear();
        state.asks.clear();

        for bid in &snapshot.bids {
            let (price, qty) = parse_level(&bid.price, &bid.quantity)?;
            if !qty.is_zero() {
                state.bids.insert(price, qty);
            }
        }

        for ask in &snapshot.asks {
            let (price, qty) = parse_level(&ask.price, &ask.quantity)?;
            if !qty.is_zero() {
                state.asks.insert(price, qty);
            }
        }

        if let (Some((bid, _)), Some((ask, _))) =
            (state.bids.last_key_value(), state.asks.first_key_value())
        {
            if bid >= ask {
                return Err(DataError::CrossedBook {
                    bid: *bid,
                    ask: *ask,
                });
            }
        }

        state.refresh_stats();
        Ok(())
    }

    /// Processes one depth update from the stream.
    ///
    /// Uninitialized books buffer everything. Initialized books apply
    /// in-sequence events, accept overlapping events that straddle the
    /// snapshot boundary, and buffer anything else as a sequence gap for
    /// the reinitialization policy to resolve. Infallible: malformed
    /// levels inside an otherwise valid event are skipped.
    pub fn handle_depth_update(&self, update: DepthUpdate) {
        let mut state = self.inner.write();

        if !state.initialized {
            state.buffer_event(update);
            return;
        }

        let expected = state.last_update_id;
        if update.prev_update_id != expected {
            if update.first_update_id <= expected + 1 && update.final_update_id > expected {
                // Valid event spanning the snapshot boundary, common
                // during a reinit window.
                state.apply_update(&update);
                return;
            }

            state.buffer_event(update);
            return;
        }

        state.apply_update(&update);
    }

    /// Replays buffered events after a snapshot load and flips the book
    /// initialized.
    ///
    /// Events entirely behind the snapshot are discarded. The rest are
    /// sorted by first update id and applied as long as each one chains
    /// onto the advancing anchor, so a run of consecutive events past
    /// the snapshot replays in full. With an empty or useless buffer the
    /// book still initializes and the next in-sequence event establishes
    /// continuity.
    pub fn process_buffered_events(&self) {
        let mut state = self.inner.write();

        let last = state.last_update_id;
        let buffered = std::mem::take(&mut state.event_buffer);
        let mut valid: Vec<DepthUpdate> = Vec::new();

        for event in buffered {
            if event.final_update_id <= last {
                debug!(
                    final_id = event.final_update_id,
                    last_update_id = last,
                    "discarding stale buffered event"
                );
                continue;
            }
            valid.push(event);
        }

        if valid.is_empty() {
            debug!("no usable buffered events, starting fresh");
            state.initialized = true;
            state.refresh_stats();
            return;
        }

        valid.sort_by_key(|e| e.first_update_id);

        let mut applied = 0usize;
        for event in valid {
            if event.first_update_id <= state.last_update_id + 1 {
                state.apply_update(&event);
                applied += 1;
            }
        }

        state.initialized = true;
        state.refresh_stats();
        debug!(applied, "order book initialized from buffer");
    }

    /// Returns true once a snapshot has been loaded and buffered events
    /// replayed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.read().initialized
    }

    /// Returns true when the catch-up buffer has outgrown the given
    /// threshold, the primary signal that stream and book have diverged.
    #[must_use]
    pub fn needs_reinit(&self, max_buffered: usize) -> bool {
        self.inner.read().event_buffer.len() > max_buffered
    }

    /// Pushes the book back to uninitialized ahead of a snapshot refetch.
    pub fn mark_uninitialized(&self) {
        self.inner.write().initialized = false;
    }

    /// Returns the number of events waiting in the catch-up buffer.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.inner.read().event_buffer.len()
    }

    /// Returns a copy of the current bid levels, price ascending.
    #[must_use]
    pub fn bids(&self) -> Vec<(Decimal, Decimal)> {
        let state = self.inner.read();
        state.bids.iter().map(|(p, q)| (*p, *q)).collect()
    }

    /// Returns a copy of the current ask levels, price ascending.
    #[must_use]
    pub fn asks(&self) -> Vec<(Decimal, Decimal)> {
        let state = self.inner.read();
        state.asks.iter().map(|(p, q)| (*p, *q)).collect()
    }

    /// Returns a copy of the current statistics.
    #[must_use]
    pub fn stats(&self) -> BookStats {
        self.inner.read().stats.clone()
    }

    /// Returns the sequence id of the last applied event.
    #[must_use]
    pub fn last_update_id(&self) -> i64 {
        self.inner.read().last_update_id
    }
}

impl BookState {
    fn buffer_event(&mut self, update: DepthUpdate) {
        self.event_buffer.push(update);
        self.stats.buffered_events = self.event_buffer.len();
    }

    fn apply_update(&mut self, update: &DepthUpdate) {
        for bid in &update.bids {
            let Ok((price, qty)) = parse_level(&bid.price, &bid.quantity) else {
                continue;
            };
            if qty.is_zero() {
                self.bids.remove(&price);
            } else {
                self.bids.insert(price, qty);
            }
        }

        for ask in &update.asks {
            let Ok((price, qty)) = parse_level(&ask.price, &ask.quantity) else {
                continue;
            };
            if qty.is_zero() {
                self.asks.remove(&price);
            } else {
                self.asks.insert(price, qty);
            }
        }

        self.last_update_id = update.final_update_id;
        self.stats.events_processed += 1;
        self.stats.last_event_time = Some(update.event_time);
        self.refresh_stats();
    }

    fn refresh_stats(&mut self) {
        self.stats.bid_levels = self.bids.len();
        self.stats.ask_levels = self.asks.len();
        self.stats.buffered_events = self.event_buffer.len();

        let best_bid = self
            .bids
            .last_key_value()
            .map_or(Decimal::ZERO, |(p, _)| *p);
        let best_ask = self
            .asks
            .first_key_value()
            .map_or(Decimal::ZERO, |(p, _)| *p);
        self.stats.best_bid = best_bid;
        self.stats.best_ask = best_ask;

        self.stats.spread = if !best_bid.is_zero() && !best_ask.is_zero() && best_ask > best_bid {
            best_ask - best_bid
        } else {
            Decimal::ZERO
        };

        self.refresh_liquidity(best_bid, best_ask);
    }

    /// Depth-band sums at 0.5 / 2 / 10 percent of mid, plus full-side
    /// totals. O(N) over the current levels; derivable from the stored
    /// book alone.
    fn refresh_liquidity(&mut self, best_bid: Decimal, best_ask: Decimal) {
        let stats = &mut self.stats;

        if best_bid.is_zero() || best_ask.is_zero() {
            stats.bid_liquidity_05pct = Decimal::ZERO;
            stats.ask_liquidity_05pct = Decimal::ZERO;
            stats.bid_liquidity_2pct = Decimal::ZERO;
            stats.ask_liquidity_2pct = Decimal::ZERO;
            stats.bid_liquidity_10pct = Decimal::ZERO;
            stats.ask_liquidity_10pct = Decimal::ZERO;
            stats.delta_liquidity_05pct = Decimal::ZERO;
            stats.delta_liquidity_2pct = Decimal::ZERO;
            stats.delta_liquidity_10pct = Decimal::ZERO;
            stats.total_bids_qty = Decimal::ZERO;
            stats.total_asks_qty = Decimal::ZERO;
            stats.total_delta = Decimal::ZERO;
            return;
        }

        let mid = (best_bid + best_ask) / Decimal::TWO;
        let min_bid_05 = mid - mid * dec!(0.005);
        let min_bid_2 = mid - mid * dec!(0.02);
        let min_bid_10 = mid - mid * dec!(0.10);
        let max_ask_05 = mid + mid * dec!(0.005);
        let max_ask_2 = mid + mid * dec!(0.02);
        let max_ask_10 = mid + mid * dec!(0.10);

        let mut bid_05 = Decimal::ZERO;
        let mut bid_2 = Decimal::ZERO;
        let mut bid_10 = Decimal::ZERO;
        let mut total_bids = Decimal::ZERO;
        for (price, qty) in &self.bids {
            total_bids += *qty;
            if *price >= min_bid_05 {
                bid_05 += *qty;
            }
            if *price >= min_bid_2 {
                bid_2 += *qty;
            }
            if *price >= min_bid_10 {
                bid_10 += *qty;
            }
        }

        let mut ask_05 = Decimal::ZERO;
        let mut ask_2 = Decimal::ZERO;
        let mut ask_10 = Decimal::ZERO;
        let mut total_asks = Decimal::ZERO;
        for (price, qty) in &self.asks {
            total_asks += *qty;
            if *price <= max_ask_05 {
                ask_05 += *qty;
            }
            if *price <= max_ask_2 {
                ask_2 += *qty;
            }
            if *price <= max_ask_10 {
                ask_10 += *qty;
            }
        }

        stats.bid_liquidity_05pct = bid_05;
        stats.ask_liquidity_05pct = ask_05;
        stats.bid_liquidity_2pct = bid_2;
        stats.ask_liquidity_2pct = ask_2;
        stats.bid_liquidity_10pct = bid_10;
        stats.ask_liquidity_10pct = ask_10;
        stats.total_bids_qty = total_bids;
        stats.total_asks_qty = total_asks;
        stats.delta_liquidity_05pct = bid_05 - ask_05;
        stats.delta_liquidity_2pct = bid_2 - ask_2;
        stats.delta_liquidity_10pct = bid_10 - ask_10;
        stats.total_delta = total_bids - total_asks;
    }
}

fn parse_level(price: &str, quantity: &str) -> Result<(Decimal, Decimal), DataError> {
    let price = Decimal::from_str(price).map_err(|_| DataError::InvalidPrice {
        value: price.to_string(),
    })?;
    let quantity = Decimal::from_str(quantity).map_err(|_| DataError::InvalidQuantity {
        value: quantity.to_string(),
    })?;
    Ok((price, quantity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sirocco_core::data::PriceLevel;
    use sirocco_core::types::ExchangeId;

    fn snapshot(last_update_id: i64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> Snapshot {
        Snapshot {
            exchange: ExchangeId::Binance,
            symbol: "BTCUSDT".to_string(),
            last_update_id,
            bids: bids.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect(),
            asks: asks.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect(),
            timestamp: Utc::now(),
        }
    }

    fn update(
        first: i64,
        last: i64,
        prev: i64,
        bids: &[(&str, &str)],
        asks: &[(&str, &str)],
    ) -> DepthUpdate {
        DepthUpdate {
            exchange: ExchangeId::Binance,
            symbol: "BTCUSDT".to_string(),
            event_time: Utc::now(),
            first_update_id: first,
            final_update_id: last,
            prev_update_id: prev,
            bids: bids.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect(),
            asks: asks.iter().map(|(p, q)| PriceLevel::new(*p, *q)).collect(),
        }
    }

    fn initialized_book() -> OrderBook {
        let book = OrderBook::new();
        book.load_snapshot(&snapshot(
            100,
            &[("50000", "2"), ("49990", "1")],
            &[("50010", "1.5"), ("50020", "3")],
        ))
        .unwrap();
        book.process_buffered_events();
        book
    }

    #[test]
    fn test_load_snapshot_seeds_book() {
        let book = OrderBook::new();
        book.load_snapshot(&snapshot(
            100,
            &[("50000", "2"), ("49990", "1"), ("49980", "0")],
            &[("50010", "1.5")],
        ))
        .unwrap();

        let stats = book.stats();
        assert_eq!(stats.best_bid, dec!(50000));
        assert_eq!(stats.best_ask, dec!(50010));
        assert_eq!(stats.bid_levels, 2, "zero-quantity entries are dropped");
        assert_eq!(book.last_update_id(), 100);
        assert!(!book.is_initialized(), "snapshot load alone does not initialize");
    }

    #[test]
    fn test_load_snapshot_rejects_bad_price() {
        let book = OrderBook::new();
        let result = book.load_snapshot(&snapshot(1, &[("not-a-price", "2")], &[]));
        assert!(matches!(result, Err(DataError::InvalidPrice { .. })));
    }

    #[test]
    fn test_load_snapshot_rejects_crossed_book() {
        let book = OrderBook::new();
        let result = book.load_snapshot(&snapshot(
            1,
            &[("50010", "1"), ("49990", "2")],
            &[("50000", "1")],
        ));

        assert!(matches!(result, Err(DataError::CrossedBook { .. })));
        assert!(!book.is_initialized());
    }

    #[test]
    fn test_uninitialized_book_buffers_everything() {
        let book = OrderBook::new();
        book.handle_depth_update(update(1, 2, 0, &[("50000", "1")], &[]));
        book.handle_depth_update(update(3, 4, 2, &[("50001", "1")], &[]));

        assert_eq!(book.buffered_len(), 2);
        assert_eq!(book.stats().bid_levels, 0);
    }

    #[test]
    fn test_in_sequence_update_advances_anchor() {
        let book = initialized_book();
        book.handle_depth_update(update(101, 105, 100, &[("50005", "1")], &[]));

        assert_eq!(book.last_update_id(), 105);
        assert_eq!(book.stats().best_bid, dec!(50005));
        assert_eq!(book.buffered_len(), 0);
    }

    #[test]
    fn test_overlapping_update_accepted() {
        // Straddles the snapshot boundary: prev does not match but the
        // span covers the anchor.
        let book = initialized_book();
        book.handle_depth_update(update(99, 103, 95, &[("50006", "2")], &[]));

        assert_eq!(book.last_update_id(), 103);
        assert_eq!(book.stats().best_bid, dec!(50006));
    }

    #[test]
    fn test_gap_is_buffered_not_applied() {
        let book = initialized_book();
        let before = book.stats();

        book.handle_depth_update(update(150, 151, 149, &[("51000", "9")], &[]));

        let after = book.stats();
        assert_eq!(book.buffered_len(), 1);
        assert_eq!(after.best_bid, before.best_bid);
        assert_eq!(after.events_processed, before.events_processed);
        assert_eq!(book.last_update_id(), 100);
    }

    #[test]
    fn test_stale_update_is_not_applied() {
        let book = initialized_book();
        let before = book.stats();

        // Entirely behind the anchor: fails both the in-sequence and the
        // overlap checks.
        book.handle_depth_update(update(90, 95, 89, &[("60000", "5")], &[]));

        let after = book.stats();
        assert_eq!(after.best_bid, before.best_bid);
        assert_eq!(after.total_bids_qty, before.total_bids_qty);
        assert_eq!(book.last_update_id(), 100);
    }

    #[test]
    fn test_initialization_with_buffered_events() {
        // Snapshot lastUpdateId=100; pre-snapshot events with final ids
        // 98 (stale), 101 (straddling) and 102 (following).
        let book = OrderBook::new();
        book.handle_depth_update(update(97, 98, 96, &[("49000", "1")], &[]));
        book.handle_depth_update(update(99, 101, 98, &[("50001", "1")], &[]));
        book.handle_depth_update(update(102, 102, 101, &[("50002", "1")], &[]));

        book.load_snapshot(&snapshot(100, &[("50000", "2")], &[("50010", "1")]))
            .unwrap();
        book.process_buffered_events();

        assert!(book.is_initialized());
        assert_eq!(book.last_update_id(), 102);
        assert_eq!(book.buffered_len(), 0);
        assert_eq!(book.stats().best_bid, dec!(50002));
        // The stale event's level never made it in.
        assert!(!book.bids().iter().any(|(p, _)| *p == dec!(49000)));
    }

    #[test]
    fn test_empty_buffer_still_initializes() {
        let book = OrderBook::new();
        book.load_snapshot(&snapshot(100, &[("50000", "2")], &[]))
            .unwrap();
        book.process_buffered_events();

        assert!(book.is_initialized());
        assert_eq!(book.last_update_id(), 100);
    }

    #[test]
    fn test_level_removal_empties_side() {
        let book = OrderBook::new();
        book.load_snapshot(&snapshot(100, &[("50000", "2")], &[]))
            .unwrap();
        book.process_buffered_events();

        book.handle_depth_update(update(101, 101, 100, &[("50000", "0")], &[]));

        let stats = book.stats();
        assert!(book.bids().is_empty());
        assert_eq!(stats.best_bid, Decimal::ZERO);
        assert_eq!(stats.spread, Decimal::ZERO);
    }

    #[test]
    fn test_best_bid_rescan_after_removal() {
        let book = initialized_book();
        book.handle_depth_update(update(101, 101, 100, &[("50000", "0")], &[]));

        assert_eq!(book.stats().best_bid, dec!(49990));
    }

    #[test]
    fn test_positive_quantities_invariant() {
        let book = initialized_book();
        book.handle_depth_update(update(
            101,
            101,
            100,
            &[("49995", "3"), ("49990", "0")],
            &[("50015", "2"), ("50010", "0")],
        ));

        assert!(book.bids().iter().all(|(_, q)| *q > Decimal::ZERO));
        assert!(book.asks().iter().all(|(_, q)| *q > Decimal::ZERO));
        let stats = book.stats();
        assert_eq!(stats.best_bid, dec!(50000));
        assert_eq!(stats.best_ask, dec!(50015));
    }

    #[test]
    fn test_depth_bands() {
        // Mid = 50000. Bids at 0.2%, 0.6% and 4% distance.
        let book = OrderBook::new();
        book.load_snapshot(&snapshot(
            1,
            &[("49900", "3"), ("49700", "5"), ("48000", "10")],
            &[("50100", "1")],
        ))
        .unwrap();
        book.process_buffered_events();

        let stats = book.stats();
        assert_eq!(stats.mid_price(), dec!(50000));
        assert_eq!(stats.bid_liquidity_05pct, dec!(3));
        assert_eq!(stats.bid_liquidity_2pct, dec!(8));
        assert_eq!(stats.bid_liquidity_10pct, dec!(18));
        assert_eq!(stats.total_bids_qty, dec!(18));
    }

    #[test]
    fn test_delta_and_spread_identities() {
        let book = initialized_book();
        let stats = book.stats();

        assert_eq!(
            stats.delta_liquidity_05pct,
            stats.bid_liquidity_05pct - stats.ask_liquidity_05pct
        );
        assert_eq!(
            stats.delta_liquidity_10pct,
            stats.bid_liquidity_10pct - stats.ask_liquidity_10pct
        );
        assert_eq!(stats.total_delta, stats.total_bids_qty - stats.total_asks_qty);
        assert_eq!(stats.spread, stats.best_ask - stats.best_bid);
    }

    #[test]
    fn test_one_sided_book_zeroes_bands() {
        let book = OrderBook::new();
        book.load_snapshot(&snapshot(1, &[("50000", "2")], &[]))
            .unwrap();
        book.process_buffered_events();

        let stats = book.stats();
        assert_eq!(stats.bid_liquidity_2pct, Decimal::ZERO);
        assert_eq!(stats.total_bids_qty, Decimal::ZERO);
        assert_eq!(stats.spread, Decimal::ZERO);
    }

    #[test]
    fn test_reinit_cycle_recovers_from_gap_storm() {
        let book = initialized_book();

        // 101 gap-inducing updates push the buffer over the threshold.
        for i in 0..101 {
            let base = 1000 + i * 10;
            book.handle_depth_update(update(base, base + 1, base - 1, &[("50001", "1")], &[]));
        }
        assert!(book.needs_reinit(100));

        // The reinit policy refetches a snapshot and replays the buffer.
        book.mark_uninitialized();
        book.load_snapshot(&snapshot(2010, &[("50100", "4")], &[("50110", "2")]))
            .unwrap();
        book.process_buffered_events();

        assert!(book.is_initialized());
        assert_eq!(book.buffered_len(), 0);

        // Subsequent in-sequence updates apply normally.
        let anchor = book.last_update_id();
        book.handle_depth_update(update(
            anchor + 1,
            anchor + 1,
            anchor,
            &[("50105", "1")],
            &[],
        ));
        assert_eq!(book.stats().best_bid, dec!(50105));
    }

    #[test]
    fn test_reinit_not_needed_below_threshold() {
        let book = initialized_book();
        for i in 0..50 {
            let base = 1000 + i * 10;
            book.handle_depth_update(update(base, base + 1, base - 1, &[], &[]));
        }
        assert!(!book.needs_reinit(100));
    }
}
