//! # Sirocco Server
//!
//! The broadcast server and feed orchestrator: accepts streaming
//! clients, publishes aggregated books and statistics on a fixed
//! cadence, handles the per-client control channel, and owns the worker
//! fleet that is recycled whenever a client requests a different
//! trading symbol.

#![warn(clippy::all)]

/// Feed lifecycle orchestration
pub mod orchestrator;

/// Shared registry of live order books
pub mod registry;

/// The broadcast server and publish loops
pub mod server;

/// Graceful shutdown coordination
pub mod shutdown;

/// Streaming endpoint plumbing
pub mod ws;

pub use orchestrator::Orchestrator;
pub use registry::BookRegistry;
pub use server::{BroadcastServer, ServerState};
pub use shutdown::{setup_signal_handlers, ShutdownController};
