//! # Sirocco Exchange
//!
//! Venue adapters translating heterogeneous snapshot and streaming
//! protocols into one canonical depth-update shape.
//!
//! Every adapter implements [`ExchangeAdapter`]: connect, stream-or-REST
//! snapshot, a finite update channel, health reporting and idempotent
//! shutdown. The [`create_adapter`] factory maps a venue tag to a fresh
//! instance. Adapters never reconnect on their own; when a session dies
//! the update stream closes and the orchestrator recycles the worker.

#![warn(clippy::all)]

mod adapter;
mod health;
mod seq;
mod symbol;
mod ws;

pub mod asterdex;
pub mod binance;
pub mod bingx;
pub mod bybit;
pub mod coinbase;
pub mod hyperliquid;
pub mod kraken;
pub mod okx;

pub use adapter::{create_adapter, ExchangeAdapter};
pub use health::HealthTracker;
pub use seq::{SyntheticIds, SyntheticSequence};
pub use symbol::{coin_symbol, dash_symbol, dash_usd_symbol, slash_symbol};

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::warn;

use sirocco_core::data::{DepthUpdate, Snapshot};
use sirocco_core::error::ExchangeError;
use sirocco_core::types::ExchangeId;

/// Capacity of each adapter's outbound update channel.
pub const UPDATE_CHANNEL_CAPACITY: usize = 1000;

/// Deadline for snapshot fetches and stream-born snapshot waits.
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Forwards an update without blocking the reader; a full channel drops
/// the update with a warning.
pub(crate) fn try_forward(
    tx: &mpsc::Sender<DepthUpdate>,
    update: DepthUpdate,
    exchange: ExchangeId,
) {
    use tokio::sync::mpsc::error::TrySendError;

    match tx.try_send(update) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(exchange = %exchange, "update channel full, dropping update");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Blocks on the stream-born snapshot slot with the bounded snapshot
/// timeout.
pub(crate) async fn await_snapshot(
    mut rx: watch::Receiver<Option<Snapshot>>,
    exchange: ExchangeId,
) -> Result<Snapshot, ExchangeError> {
    match timeout(SNAPSHOT_TIMEOUT, rx.wait_for(Option::is_some)).await {
        Ok(Ok(guard)) => guard
            .clone()
            .ok_or(ExchangeError::SnapshotTimeout { exchange }),
        _ => Err(ExchangeError::SnapshotTimeout { exchange }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn dummy_update() -> DepthUpdate {
        DepthUpdate {
            exchange: ExchangeId::Binance,
            symbol: "BTCUSDT".to_string(),
            event_time: Utc::now(),
            first_update_id: 1,
            final_update_id: 1,
            prev_update_id: 0,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_try_forward_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        try_forward(&tx, dummy_update(), ExchangeId::Binance);
        try_forward(&tx, dummy_update(), ExchangeId::Binance);

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err(), "second update was dropped");
    }

    #[tokio::test]
    async fn test_await_snapshot_resolves_when_published() {
        let (tx, rx) = watch::channel(None);
        let snapshot = Snapshot {
            exchange: ExchangeId::Bybit,
            symbol: "BTCUSDT".to_string(),
            last_update_id: 7,
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: Utc::now(),
        };

        let waiter = tokio::spawn(await_snapshot(rx, ExchangeId::Bybit));
        tx.send(Some(snapshot.clone())).unwrap();

        let received = waiter.await.unwrap().unwrap();
        assert_eq!(received.last_update_id, 7);
    }
}
