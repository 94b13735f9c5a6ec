//! The adapter contract every venue implements, plus the factory.

use async_trait::async_trait;
use tokio::sync::mpsc;

use sirocco_core::data::{DepthUpdate, HealthStatus, Snapshot};
use sirocco_core::error::ExchangeError;
use sirocco_core::types::ExchangeId;

use crate::asterdex::AsterdexAdapter;
use crate::binance::BinanceAdapter;
use crate::bingx::BingxAdapter;
use crate::bybit::BybitAdapter;
use crate::coinbase::CoinbaseAdapter;
use crate::hyperliquid::HyperliquidAdapter;
use crate::kraken::KrakenAdapter;
use crate::okx::OkxAdapter;

/// Contract implemented by every venue adapter.
///
/// An adapter owns exactly one venue session for one symbol. Its identity
/// is tied to that symbol; switching symbols means creating a fresh
/// adapter. There is no in-adapter reconnect: when the transport fails the
/// update stream closes and lifecycle ownership passes back to the
/// orchestrator.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Returns the venue tag.
    fn name(&self) -> ExchangeId;

    /// Returns the canonical trading symbol this adapter was built for.
    fn symbol(&self) -> &str;

    /// Establishes the venue session and starts the background reader.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError`] on handshake or subscription failure.
    async fn connect(&mut self) -> Result<(), ExchangeError>;

    /// Idempotent shutdown: cancels all tasks, closes the update stream
    /// after a short transport-close grace, and marks the adapter
    /// disconnected.
    async fn close(&mut self);

    /// Yields a canonical snapshot, either freshly fetched over REST or
    /// the stream-born snapshot behind a bounded wait.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError`] on fetch failure or timeout.
    async fn snapshot(&self) -> Result<Snapshot, ExchangeError>;

    /// Takes the receiving end of the update stream.
    ///
    /// The stream is finite: it closes when the venue session ends.
    /// Returns `None` on second and later calls.
    fn take_updates(&mut self) -> Option<mpsc::Receiver<DepthUpdate>>;

    /// Returns whether the venue session is currently up.
    fn is_connected(&self) -> bool;

    /// Returns a snapshot of connection health.
    fn health(&self) -> HealthStatus;
}

/// Creates a fresh adapter for the given venue and canonical symbol.
///
/// The (venue, variant) tag maps to an adapter constructor by flat
/// dispatch; every [`ExchangeId`] is covered.
#[must_use]
pub fn create_adapter(id: ExchangeId, symbol: &str) -> Box<dyn ExchangeAdapter> {
    match id {
        ExchangeId::Binance => Box::new(BinanceAdapter::new_spot(symbol)),
        ExchangeId::Binancef => Box::new(BinanceAdapter::new_futures(symbol)),
        ExchangeId::Bybit => Box::new(BybitAdapter::new_spot(symbol)),
        ExchangeId::Bybitf => Box::new(BybitAdapter::new_linear(symbol)),
        ExchangeId::Kraken => Box::new(KrakenAdapter::new(symbol)),
        ExchangeId::Okx => Box::new(OkxAdapter::new(symbol)),
        ExchangeId::Coinbase => Box::new(CoinbaseAdapter::new(symbol)),
        ExchangeId::Asterdexf => Box::new(AsterdexAdapter::new(symbol)),
        ExchangeId::Bingx => Box::new(BingxAdapter::new_spot(symbol)),
        ExchangeId::Bingxf => Box::new(BingxAdapter::new_swap(symbol)),
        ExchangeId::Hyperliquidf => Box::new(HyperliquidAdapter::new(symbol)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_covers_every_venue() {
        for id in ExchangeId::ALL {
            let adapter = create_adapter(id, "BTCUSDT");
            assert_eq!(adapter.name(), id);
            assert!(!adapter.is_connected());
        }
    }

    #[test]
    fn test_factory_stamps_canonical_symbol() {
        for id in ExchangeId::ALL {
            let adapter = create_adapter(id, "BTCUSDT");
            assert_eq!(adapter.symbol(), "BTCUSDT");
        }
    }
}
