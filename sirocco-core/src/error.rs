//! Error types and handling framework.
//!
//! Errors are organized hierarchically by domain and recovered at the
//! smallest scope that can continue meaningful work: transient venue errors
//! stay inside the adapter, lifecycle errors terminate one worker, and only
//! a server listen failure is fatal to the process.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::ExchangeId;

/// Network and connection errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Connection could not be established.
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        /// Underlying failure description
        reason: String,
    },

    /// Operation exceeded its deadline.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// Connection closed while in use.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Close reason
        reason: String,
    },

    /// WebSocket protocol failure.
    #[error("websocket error: {reason}")]
    WebSocket {
        /// Underlying failure description
        reason: String,
    },

    /// HTTP request failure.
    #[error("http error: {reason}")]
    Http {
        /// Underlying failure description
        reason: String,
    },
}

/// Venue API errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Subscription request was rejected.
    #[error("[{exchange}] subscription failed: {reason}")]
    Subscription {
        /// Venue that rejected the subscription
        exchange: ExchangeId,
        /// Rejection reason
        reason: String,
    },

    /// Venue returned an error-coded response.
    #[error("[{exchange}] api error code={code}: {message}")]
    Api {
        /// Venue that produced the error
        exchange: ExchangeId,
        /// Venue error code
        code: String,
        /// Venue error message
        message: String,
    },

    /// No snapshot arrived within the bounded wait.
    #[error("[{exchange}] timed out waiting for snapshot")]
    SnapshotTimeout {
        /// Venue that failed to deliver a snapshot
        exchange: ExchangeId,
    },

    /// Venue returned an empty or structurally unusable payload.
    #[error("[{exchange}] malformed payload: {reason}")]
    MalformedPayload {
        /// Venue that produced the payload
        exchange: ExchangeId,
        /// What was wrong with it
        reason: String,
    },

    /// Transport-level failure.
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Data parsing and validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// A price failed decimal parsing.
    #[error("invalid price {value:?}")]
    InvalidPrice {
        /// Offending text
        value: String,
    },

    /// A quantity failed decimal parsing.
    #[error("invalid quantity {value:?}")]
    InvalidQuantity {
        /// Offending text
        value: String,
    },

    /// Bid at or above ask after validation.
    #[error("crossed book: bid {bid} >= ask {ask}")]
    CrossedBook {
        /// Offending bid price
        bid: Decimal,
        /// Offending ask price
        ask: Decimal,
    },
}

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Venue tag not in the supported set.
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),

    /// Tick value not in the allowed set.
    #[error("invalid tick size: {0}")]
    InvalidTick(f64),
}

/// Top-level error type for the Sirocco aggregator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SiroccoError {
    /// Network-related error.
    #[error("{0}")]
    Network(#[from] NetworkError),

    /// Venue API error.
    #[error("{0}")]
    Exchange(#[from] ExchangeError),

    /// Data parsing or validation error.
    #[error("{0}")]
    Data(#[from] DataError),

    /// Configuration error.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_display() {
        let err = NetworkError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "operation timed out after 5000ms");
    }

    #[test]
    fn test_exchange_error_display() {
        let err = ExchangeError::SnapshotTimeout {
            exchange: ExchangeId::Bybit,
        };
        assert_eq!(err.to_string(), "[bybit] timed out waiting for snapshot");
    }

    #[test]
    fn test_error_conversion_to_top_level() {
        let net = NetworkError::ConnectionFailed {
            reason: "refused".to_string(),
        };
        let top: SiroccoError = net.into();
        assert!(matches!(top, SiroccoError::Network(_)));

        let exch: SiroccoError = ExchangeError::Network(NetworkError::Timeout { timeout_ms: 1 }).into();
        assert!(matches!(exch, SiroccoError::Exchange(_)));
    }

    #[test]
    fn test_data_error_display() {
        let err = DataError::InvalidPrice {
            value: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "invalid price \"abc\"");
    }
}
