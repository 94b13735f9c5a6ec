//! Wire protocol for the streaming endpoint.
//!
//! Two outbound message kinds, both textual JSON with a `type`
//! discriminant. Decimal values are serialized as strings so they
//! round-trip through clients without precision loss.

use serde::{Deserialize, Serialize};

use sirocco_core::data::BookStats;
use sirocco_core::types::ExchangeId;

/// A published price level with the running cumulative quantity in sort
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireLevel {
    /// Price as exact decimal text
    pub price: String,
    /// Quantity at this bucket
    pub quantity: String,
    /// Running quantity sum in the side's sort order
    pub cumulative: String,
}

/// Messages pushed to streaming clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Aggregated book for one venue.
    Orderbook {
        /// Venue tag
        exchange: ExchangeId,
        /// Publish time, unix milliseconds
        timestamp: i64,
        /// Bid buckets, price descending
        bids: Vec<WireLevel>,
        /// Ask buckets, price ascending
        asks: Vec<WireLevel>,
    },
    /// Market-quality statistics for one venue.
    Stats {
        /// Venue tag
        exchange: ExchangeId,
        /// Publish time, unix milliseconds
        timestamp: i64,
        /// Best bid price
        #[serde(rename = "bestBid")]
        best_bid: String,
        /// Best ask price
        #[serde(rename = "bestAsk")]
        best_ask: String,
        /// Mid price
        #[serde(rename = "midPrice")]
        mid_price: String,
        /// Spread
        spread: String,
        /// Bid depth within 0.5 % of mid
        #[serde(rename = "bidLiquidity05Pct")]
        bid_liquidity_05pct: String,
        /// Ask depth within 0.5 % of mid
        #[serde(rename = "askLiquidity05Pct")]
        ask_liquidity_05pct: String,
        /// Bid minus ask depth at 0.5 %
        #[serde(rename = "deltaLiquidity05Pct")]
        delta_liquidity_05pct: String,
        /// Bid depth within 2 % of mid
        #[serde(rename = "bidLiquidity2Pct")]
        bid_liquidity_2pct: String,
        /// Ask depth within 2 % of mid
        #[serde(rename = "askLiquidity2Pct")]
        ask_liquidity_2pct: String,
        /// Bid minus ask depth at 2 %
        #[serde(rename = "deltaLiquidity2Pct")]
        delta_liquidity_2pct: String,
        /// Bid depth within 10 % of mid
        #[serde(rename = "bidLiquidity10Pct")]
        bid_liquidity_10pct: String,
        /// Ask depth within 10 % of mid
        #[serde(rename = "askLiquidity10Pct")]
        ask_liquidity_10pct: String,
        /// Bid minus ask depth at 10 %
        #[serde(rename = "deltaLiquidity10Pct")]
        delta_liquidity_10pct: String,
        /// Full bid-side quantity
        #[serde(rename = "totalBidsQty")]
        total_bids_qty: String,
        /// Full ask-side quantity
        #[serde(rename = "totalAsksQty")]
        total_asks_qty: String,
        /// Full bid minus full ask quantity
        #[serde(rename = "totalDelta")]
        total_delta: String,
    },
}

impl ServerMessage {
    /// Builds a stats message from book statistics.
    #[must_use]
    pub fn stats(exchange: ExchangeId, stats: &BookStats, timestamp: i64) -> Self {
        Self::Stats {
            exchange,
            timestamp,
            best_bid: stats.best_bid.to_string(),
            best_ask: stats.best_ask.to_string(),
            mid_price: stats.mid_price().to_string(),
            spread: stats.spread.to_string(),
            bid_liquidity_05pct: stats.bid_liquidity_05pct.to_string(),
            ask_liquidity_05pct: stats.ask_liquidity_05pct.to_string(),
            delta_liquidity_05pct: stats.delta_liquidity_05pct.to_string(),
            bid_liquidity_2pct: stats.bid_liquidity_2pct.to_string(),
            ask_liquidity_2pct: stats.ask_liquidity_2pct.to_string(),
            delta_liquidity_2pct: stats.delta_liquidity_2pct.to_string(),
            bid_liquidity_10pct: stats.bid_liquidity_10pct.to_string(),
            ask_liquidity_10pct: stats.ask_liquidity_10pct.to_string(),
            delta_liquidity_10pct: stats.delta_liquidity_10pct.to_string(),
            total_bids_qty: stats.total_bids_qty.to_string(),
            total_asks_qty: stats.total_asks_qty.to_string(),
            total_delta: stats.total_delta.to_string(),
        }
    }
}

/// Control messages sent by clients.
///
/// Anything that fails to parse into one of these, including unknown
/// `type` values, is logged and ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Retune the aggregation tick shared by all published books.
    SetTick {
        /// Requested tick size; validated against the allowed set
        tick: f64,
    },
    /// Hot-switch every feed to a different trading symbol.
    ChangeSymbol {
        /// New canonical symbol, upper case
        symbol: String,
    },
}
