//! Canonical market data structures.
//!
//! Every adapter normalizes its venue's snapshot and streaming payloads into
//! these shapes before they reach the order book engine. Prices and
//! quantities are carried as the venue's original text so they round-trip
//! through the wire without loss; the engine parses them into
//! [`rust_decimal::Decimal`] when keying the book.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::ExchangeId;

/// A single price level as received from a venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price as text, exactly as the venue sent it
    pub price: String,
    /// Quantity as text; `"0"` means the level is removed
    pub quantity: String,
}

impl PriceLevel {
    /// Creates a new price level.
    #[must_use]
    pub fn new(price: impl Into<String>, quantity: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            quantity: quantity.into(),
        }
    }
}

/// Full point-in-time book state from a venue, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Source venue
    pub exchange: ExchangeId,
    /// Canonical trading symbol
    pub symbol: String,
    /// Venue-defined sequence anchor; 0 when the venue exposes none
    pub last_update_id: i64,
    /// Bid levels, unordered on ingest
    pub bids: Vec<PriceLevel>,
    /// Ask levels, unordered on ingest
    pub asks: Vec<PriceLevel>,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
}

/// Incremental change to one or more price levels, normalized.
///
/// When a venue does not provide per-event identifiers the adapter
/// synthesizes monotonically increasing ones so that
/// `prev_update_id + 1 == first_update_id` holds for consecutive events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthUpdate {
    /// Source venue
    pub exchange: ExchangeId,
    /// Canonical trading symbol
    pub symbol: String,
    /// Venue event timestamp
    pub event_time: DateTime<Utc>,
    /// First update id covered by this event
    pub first_update_id: i64,
    /// Final update id covered by this event
    pub final_update_id: i64,
    /// Final update id of the previous event, for continuity checking
    pub prev_update_id: i64,
    /// Changed bid levels
    pub bids: Vec<PriceLevel>,
    /// Changed ask levels
    pub asks: Vec<PriceLevel>,
}

/// Connection health snapshot for a single adapter.
///
/// Adapters replace the whole record on every change rather than mutating
/// individual fields, so readers always observe a consistent view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the venue session is currently up
    pub connected: bool,
    /// Last time a liveness signal was observed
    pub last_ping: Option<DateTime<Utc>>,
    /// Total messages received
    pub message_count: i64,
    /// Total errors observed
    pub error_count: i64,
    /// When the session last dropped
    pub last_reconnect_at: Option<DateTime<Utc>>,
}

/// Derived market-quality statistics for one book.
///
/// Recomputed on every applied update; values are never staler than the
/// last update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookStats {
    /// Highest bid price, zero when the bid side is empty
    pub best_bid: Decimal,
    /// Lowest ask price, zero when the ask side is empty
    pub best_ask: Decimal,
    /// `best_ask - best_bid` when both sides present, else zero
    pub spread: Decimal,
    /// Total bid quantity within 0.5 % of mid
    pub bid_liquidity_05pct: Decimal,
    /// Total ask quantity within 0.5 % of mid
    pub ask_liquidity_05pct: Decimal,
    /// Total bid quantity within 2 % of mid
    pub bid_liquidity_2pct: Decimal,
    /// Total ask quantity within 2 % of mid
    pub ask_liquidity_2pct: Decimal,
    /// Total bid quantity within 10 % of mid
    pub bid_liquidity_10pct: Decimal,
    /// Total ask quantity within 10 % of mid
    pub ask_liquidity_10pct: Decimal,
    /// Bid band minus ask band at 0.5 %
    pub delta_liquidity_05pct: Decimal,
    /// Bid band minus ask band at 2 %
    pub delta_liquidity_2pct: Decimal,
    /// Bid band minus ask band at 10 %
    pub delta_liquidity_10pct: Decimal,
    /// Sum of all bid quantities
    pub total_bids_qty: Decimal,
    /// Sum of all ask quantities
    pub total_asks_qty: Decimal,
    /// `total_bids_qty - total_asks_qty`
    pub total_delta: Decimal,
    /// Number of bid price levels
    pub bid_levels: usize,
    /// Number of ask price levels
    pub ask_levels: usize,
    /// Updates applied since the last snapshot load
    pub events_processed: i64,
    /// Events currently waiting in the catch-up buffer
    pub buffered_events: usize,
    /// Event time of the last applied update
    pub last_event_time: Option<DateTime<Utc>>,
}

impl BookStats {
    /// Returns the mid price, `(best_bid + best_ask) / 2`.
    ///
    /// When one side is empty both terms are zero; downstream consumers
    /// must tolerate a zero mid.
    #[must_use]
    pub fn mid_price(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::TWO
    }
}
