//! Feed lifecycle orchestration.
//!
//! The orchestrator owns the set of live exchange workers. Each worker is
//! independently fallible: a venue that fails to connect or snapshot logs
//! and exits without aborting the group, leaving that venue absent from
//! the registry until the next cycle. A symbol change tears every worker
//! down, clears the registry, waits a short settling delay and rebuilds
//! the fleet for the new symbol; adapters are never resubscribed in
//! place.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use sirocco_book::OrderBook;
use sirocco_core::config::{AppConfig, Config};
use sirocco_core::types::ExchangeId;
use sirocco_exchange::{create_adapter, ExchangeAdapter};

use crate::registry::BookRegistry;
use crate::shutdown::ShutdownController;

/// Owns the worker fleet and recycles it on symbol changes.
pub struct Orchestrator {
    config: Config,
    registry: Arc<BookRegistry>,
    symbol_rx: mpsc::Receiver<String>,
    shutdown: ShutdownController,
}

impl Orchestrator {
    /// Creates an orchestrator over the shared registry.
    #[must_use]
    pub fn new(
        config: Config,
        registry: Arc<BookRegistry>,
        symbol_rx: mpsc::Receiver<String>,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            config,
            registry,
            symbol_rx,
            shutdown,
        }
    }

    /// Runs worker cycles until process shutdown.
    pub async fn run(mut self) {
        loop {
            let cycle = ShutdownController::new();
            let mut workers = JoinSet::new();

            for exchange in &self.config.exchanges {
                workers.spawn(run_worker(
                    exchange.id,
                    exchange.symbol.clone(),
                    Arc::clone(&self.registry),
                    cycle.clone(),
                    self.config.app.clone(),
                ));
            }

            tokio::select! {
                new_symbol = self.symbol_rx.recv() => {
                    let Some(new_symbol) = new_symbol else {
                        // Control channel gone; treat as shutdown.
                        self.teardown(&cycle, &mut workers).await;
                        return;
                    };

                    info!(symbol = %new_symbol, "cycling all feeds for new symbol");
                    self.teardown(&cycle, &mut workers).await;
                    tokio::time::sleep(self.config.app.restart_settle_delay).await;
                    self.config.set_symbol(&new_symbol);
                }
                () = self.shutdown.wait_for_shutdown() => {
                    info!("shutting down all feeds");
                    self.teardown(&cycle, &mut workers).await;
                    return;
                }
            }
        }
    }

    /// Signals the cycle and waits, unbounded, for every worker to
    /// finish, then clears the registry.
    async fn teardown(&self, cycle: &ShutdownController, workers: &mut JoinSet<()>) {
        cycle.initiate_shutdown();
        while workers.join_next().await.is_some() {}
        self.registry.clear();
    }
}

/// Runs one venue worker from connect to teardown.
async fn run_worker(
    id: ExchangeId,
    symbol: String,
    registry: Arc<BookRegistry>,
    cycle: ShutdownController,
    app: AppConfig,
) {
    info!(exchange = %id, symbol = %symbol, "starting connection");

    let book = Arc::new(OrderBook::new());
    let mut adapter = create_adapter(id, &symbol);

    if let Err(e) = adapter.connect().await {
        error!(exchange = %id, error = %e, "failed to connect");
        return;
    }

    let snapshot = match adapter.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(exchange = %id, error = %e, "failed to get snapshot");
            adapter.close().await;
            return;
        }
    };

    if let Err(e) = book.load_snapshot(&snapshot) {
        error!(exchange = %id, error = %e, "failed to load snapshot");
        adapter.close().await;
        return;
    }

    let Some(mut updates) = adapter.take_updates() else {
        error!(exchange = %id, "update stream already taken");
        adapter.close().await;
        return;
    };

    let consumer_book = Arc::clone(&book);
    let mut consumer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            consumer_book.handle_depth_update(update);
        }
    });

    book.process_buffered_events();
    registry.register(id, Arc::clone(&book));
    info!(exchange = %id, "orderbook initialized");

    let mut cycle_rx = cycle.subscribe();
    let mut reinit_ticker = tokio::time::interval(app.reinit_check_interval);
    reinit_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut consumer => {
                info!(exchange = %id, "connection closed");
                break;
            }
            _ = cycle_rx.recv() => {
                info!(exchange = %id, "shutting down");
                break;
            }
            _ = reinit_ticker.tick() => {
                check_reinitialize(id, &book, adapter.as_ref(), &app).await;
            }
        }
    }

    registry.unregister(id);
    adapter.close().await;
    consumer.abort();
}

/// Applies the reinitialization policy: a buffer grown past the
/// threshold means stream and book have diverged, so refetch a snapshot
/// and replay.
async fn check_reinitialize(
    id: ExchangeId,
    book: &OrderBook,
    adapter: &dyn ExchangeAdapter,
    app: &AppConfig,
) {
    let buffered = book.buffered_len();

    if book.needs_reinit(app.max_buffered_events) {
        warn!(exchange = %id, buffered, "reinitializing due to buffer accumulation");
        book.mark_uninitialized();

        let snapshot = match adapter.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(exchange = %id, error = %e, "failed to reinitialize");
                return;
            }
        };

        if let Err(e) = book.load_snapshot(&snapshot) {
            error!(exchange = %id, error = %e, "failed to load snapshot during reinitialize");
            return;
        }

        book.process_buffered_events();
    } else if book.is_initialized() && buffered > 0 && buffered % 10 == 0 {
        debug!(exchange = %id, buffered, "buffer status");
    }
}
