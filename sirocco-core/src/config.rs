//! Application configuration.

use std::time::Duration;

use crate::types::{ExchangeId, TickSize};

/// Configuration for a single venue feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Venue to connect to
    pub id: ExchangeId,
    /// Canonical trading symbol, e.g. `BTCUSDT`
    pub symbol: String,
}

impl ExchangeConfig {
    /// Creates a new exchange configuration.
    #[must_use]
    pub fn new(id: ExchangeId, symbol: impl Into<String>) -> Self {
        Self {
            id,
            symbol: symbol.into(),
        }
    }
}

/// General application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Tick size used for publishing until a client retunes it
    pub default_tick: TickSize,
    /// How often each book is checked for reinitialization
    pub reinit_check_interval: Duration,
    /// Buffered-event count above which a book is reinitialized
    pub max_buffered_events: usize,
    /// Capacity of each adapter's outbound update channel
    pub update_channel_capacity: usize,
    /// How often aggregated books and stats are published
    pub publish_interval: Duration,
    /// Capacity of the broadcast queue; full means drop, not block
    pub broadcast_queue_capacity: usize,
    /// Settling delay between teardown and restart on a symbol change
    pub restart_settle_delay: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_tick: TickSize::T1,
            reinit_check_interval: Duration::from_secs(5),
            max_buffered_events: 100,
            update_channel_capacity: 1000,
            publish_interval: Duration::from_millis(200),
            broadcast_queue_capacity: 100,
            restart_settle_delay: Duration::from_millis(500),
        }
    }
}

/// Top-level configuration: the venue set plus application tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Venue feeds to run
    pub exchanges: Vec<ExchangeConfig>,
    /// Application tunables
    pub app: AppConfig,
}

impl Config {
    /// Builds the default multi-venue configuration for one symbol.
    ///
    /// BingX futures is supported by the factory but not part of the
    /// default set.
    #[must_use]
    pub fn for_symbol(symbol: &str) -> Self {
        let venues = [
            ExchangeId::Binancef,
            ExchangeId::Binance,
            ExchangeId::Bybitf,
            ExchangeId::Bybit,
            ExchangeId::Kraken,
            ExchangeId::Okx,
            ExchangeId::Coinbase,
            ExchangeId::Asterdexf,
            ExchangeId::Bingx,
            ExchangeId::Hyperliquidf,
        ];

        Self {
            exchanges: venues
                .into_iter()
                .map(|id| ExchangeConfig::new(id, symbol))
                .collect(),
            app: AppConfig::default(),
        }
    }

    /// Replaces the symbol on every configured venue.
    pub fn set_symbol(&mut self, symbol: &str) {
        for exchange in &mut self.exchanges {
            exchange.symbol = symbol.to_string();
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::for_symbol("BTCUSDT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_venues() {
        let config = Config::default();
        assert_eq!(config.exchanges.len(), 10);
        assert!(config
            .exchanges
            .iter()
            .all(|e| e.symbol == "BTCUSDT"));
        assert!(!config
            .exchanges
            .iter()
            .any(|e| e.id == ExchangeId::Bingxf));
    }

    #[test]
    fn test_set_symbol_rewrites_all() {
        let mut config = Config::for_symbol("BTCUSDT");
        config.set_symbol("ETHUSDT");
        assert!(config.exchanges.iter().all(|e| e.symbol == "ETHUSDT"));
    }

    #[test]
    fn test_app_config_defaults() {
        let app = AppConfig::default();
        assert_eq!(app.max_buffered_events, 100);
        assert_eq!(app.reinit_check_interval, Duration::from_secs(5));
        assert_eq!(app.publish_interval, Duration::from_millis(200));
        assert_eq!(app.default_tick, TickSize::T1);
    }
}
