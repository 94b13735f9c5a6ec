//! Venue identifiers and tick sizes.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Identifier for a supported venue.
///
/// The trailing `f` denotes the perpetual-futures variant of a venue;
/// absence denotes spot. Downstream consumers infer the market type from
/// the suffix, so the serialized tag is part of the wire contract.
///
/// # Examples
///
/// ```
/// use sirocco_core::types::ExchangeId;
///
/// assert_eq!(ExchangeId::Binancef.as_str(), "binancef");
/// assert!(ExchangeId::Binancef.is_futures());
/// assert!(!ExchangeId::Kraken.is_futures());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    /// Binance spot
    Binance,
    /// Binance USDT-margined futures
    Binancef,
    /// Bybit spot
    Bybit,
    /// Bybit linear futures
    Bybitf,
    /// Kraken spot
    Kraken,
    /// OKX spot (REST-polled)
    Okx,
    /// Coinbase Advanced Trade spot
    Coinbase,
    /// Asterdex perpetual futures
    Asterdexf,
    /// BingX spot
    Bingx,
    /// BingX perpetual futures
    Bingxf,
    /// Hyperliquid perpetual futures
    Hyperliquidf,
}

impl ExchangeId {
    /// All supported venues.
    pub const ALL: [Self; 11] = [
        Self::Binance,
        Self::Binancef,
        Self::Bybit,
        Self::Bybitf,
        Self::Kraken,
        Self::Okx,
        Self::Coinbase,
        Self::Asterdexf,
        Self::Bingx,
        Self::Bingxf,
        Self::Hyperliquidf,
    ];

    /// Returns the wire tag for this venue.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Binancef => "binancef",
            Self::Bybit => "bybit",
            Self::Bybitf => "bybitf",
            Self::Kraken => "kraken",
            Self::Okx => "okx",
            Self::Coinbase => "coinbase",
            Self::Asterdexf => "asterdexf",
            Self::Bingx => "bingx",
            Self::Bingxf => "bingxf",
            Self::Hyperliquidf => "hyperliquidf",
        }
    }

    /// Returns true if this venue is a perpetual-futures market.
    #[must_use]
    pub fn is_futures(&self) -> bool {
        self.as_str().ends_with('f')
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownExchange(s.to_string()))
    }
}

/// Price bucket size used when publishing aggregated books.
///
/// Only the values in [`TickSize::ALL`] are representable; anything else
/// arriving from a client fails the [`TryFrom<f64>`] conversion with
/// [`ConfigError::InvalidTick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickSize {
    /// 0.1
    T01,
    /// 1
    T1,
    /// 10
    T10,
    /// 50
    T50,
    /// 100
    T100,
}

impl TickSize {
    /// Available tick sizes in order of precision.
    pub const ALL: [Self; 5] = [Self::T01, Self::T1, Self::T10, Self::T50, Self::T100];

    /// Returns the exact decimal value of this tick size.
    #[must_use]
    pub fn as_decimal(&self) -> Decimal {
        match self {
            Self::T01 => dec!(0.1),
            Self::T1 => dec!(1),
            Self::T10 => dec!(10),
            Self::T50 => dec!(50),
            Self::T100 => dec!(100),
        }
    }

    /// Returns the next tick size, wrapping around to the first.
    #[must_use]
    pub fn next(&self) -> Self {
        let idx = Self::ALL.iter().position(|t| t == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    /// Returns the previous tick size, wrapping around to the last.
    #[must_use]
    pub fn previous(&self) -> Self {
        let idx = Self::ALL.iter().position(|t| t == self).unwrap_or(0);
        Self::ALL[(idx + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl Default for TickSize {
    fn default() -> Self {
        Self::T1
    }
}

impl TryFrom<f64> for TickSize {
    type Error = ConfigError;

    /// Validates a numeric tick value from the control channel.
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        match value {
            v if v == 0.1 => Ok(Self::T01),
            v if v == 1.0 => Ok(Self::T1),
            v if v == 10.0 => Ok(Self::T10),
            v if v == 50.0 => Ok(Self::T50),
            v if v == 100.0 => Ok(Self::T100),
            _ => Err(ConfigError::InvalidTick(value)),
        }
    }
}

impl fmt::Display for TickSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_decimal())
    }
}
