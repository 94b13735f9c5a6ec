//! Multi-exchange order book monitor.
//!
//! Reconstructs sequence-consistent books for one trading symbol across
//! every configured venue and streams aggregated books plus
//! market-quality statistics to WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sirocco_book::Aggregator;
use sirocco_core::config::Config;
use sirocco_server::{
    setup_signal_handlers, BookRegistry, BroadcastServer, Orchestrator, ShutdownController,
};

/// Sirocco order book monitor
#[derive(Parser, Debug)]
#[command(name = "sirocco-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Trading symbol to monitor
    #[arg(long, default_value = "BTCUSDT")]
    symbol: String,

    /// Interval in seconds for logging combined orderbook stats
    #[arg(long, default_value_t = 10, value_name = "SECONDS")]
    log_interval: u64,

    /// Port for the streaming endpoint
    #[arg(long, default_value_t = 8086, env = "SIROCCO_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let symbol = args.symbol.to_uppercase();
    let config = Config::for_symbol(&symbol);

    info!(symbol = %symbol, venues = config.exchanges.len(), "starting multi-exchange orderbook monitor");

    let registry = Arc::new(BookRegistry::new());
    let aggregator = Arc::new(Aggregator::new(config.app.default_tick));
    let (symbol_tx, symbol_rx) = mpsc::channel(1);

    let shutdown = ShutdownController::new();
    tokio::spawn(setup_signal_handlers(shutdown.clone()));

    tokio::spawn(log_combined_stats(
        Arc::clone(&registry),
        Duration::from_secs(args.log_interval.max(1)),
    ));

    let server = BroadcastServer::new(
        Arc::clone(&registry),
        Arc::clone(&aggregator),
        symbol_tx,
        &config.app,
    );
    let addr = format!("0.0.0.0:{}", args.port);
    tokio::spawn(async move {
        if let Err(e) = server.run(&addr).await {
            error!(error = %e, "websocket server error");
            std::process::exit(1);
        }
    });

    let orchestrator = Orchestrator::new(config, registry, symbol_rx, shutdown.clone());
    orchestrator.run().await;

    info!("all exchanges closed, goodbye");
}

/// Periodically logs mid, spread and depth bands for every initialized
/// book.
async fn log_combined_stats(registry: Arc<BookRegistry>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        for (exchange, book) in registry.entries() {
            if !book.is_initialized() {
                continue;
            }

            let stats = book.stats();
            info!(
                exchange = %exchange,
                mid = %stats.mid_price().round_dp(2),
                spread = %stats.spread.round_dp(4),
                best_bid = %stats.best_bid.round_dp(2),
                best_ask = %stats.best_ask.round_dp(2),
                bid_depth_05 = %stats.bid_liquidity_05pct.round_dp(2),
                ask_depth_05 = %stats.ask_liquidity_05pct.round_dp(2),
                bid_depth_2 = %stats.bid_liquidity_2pct.round_dp(2),
                ask_depth_2 = %stats.ask_liquidity_2pct.round_dp(2),
                bid_depth_10 = %stats.bid_liquidity_10pct.round_dp(2),
                ask_depth_10 = %stats.ask_liquidity_10pct.round_dp(2),
                total_bids = %stats.total_bids_qty.round_dp(2),
                total_asks = %stats.total_asks_qty.round_dp(2),
                events = stats.events_processed,
                buffered = stats.buffered_events,
                "book stats"
            );
        }
    }
}
