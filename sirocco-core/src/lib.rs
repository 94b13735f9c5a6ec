//! # Sirocco Core
//!
//! Canonical data model for the Sirocco multi-exchange order book aggregator.
//!
//! This crate defines the venue-independent shapes every other crate speaks:
//! - Canonical snapshots and depth updates ([`data`])
//! - Venue identifiers and tick sizes ([`types`])
//! - The hierarchical error taxonomy ([`error`])
//! - Application configuration ([`config`])
//!
//! All prices and quantities are exact decimals ([`rust_decimal::Decimal`]);
//! binary floating-point never stores market data.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Application configuration
pub mod config;

/// Canonical market data structures
pub mod data;

/// Error types and handling framework
pub mod error;

/// Venue identifiers and tick sizes
pub mod types;

pub use config::{AppConfig, Config, ExchangeConfig};
pub use data::{BookStats, DepthUpdate, HealthStatus, PriceLevel, Snapshot};
pub use error::{ConfigError, DataError, ExchangeError, NetworkError, SiroccoError};
pub use types::{ExchangeId, TickSize};
