//! Canonical-to-venue symbol mapping.
//!
//! Adapters accept the canonical `BASEQUOTE` form (e.g. `BTCUSDT`) and
//! translate it into whatever the venue expects. Unknown suffixes fall
//! through unchanged with a warning so an operator can still feed a
//! venue-native symbol directly.

use tracing::warn;

/// Converts a canonical symbol to the dash form, e.g. `BTCUSDT` ->
/// `BTC-USDT`. Used by OKX and BingX.
#[must_use]
pub fn dash_symbol(symbol: &str) -> String {
    if symbol.contains('-') {
        return symbol.to_uppercase();
    }

    let symbol = symbol.to_uppercase();
    for quote in ["USDT", "USDC", "USD"] {
        if let Some(base) = symbol.strip_suffix(quote) {
            return format!("{base}-{quote}");
        }
    }

    warn!(symbol = %symbol, "could not map symbol to dash form, using as-is");
    symbol
}

/// Converts a canonical symbol to the dash-USD form Coinbase quotes in,
/// e.g. `BTCUSDT` -> `BTC-USD`.
#[must_use]
pub fn dash_usd_symbol(symbol: &str) -> String {
    if symbol.contains('-') {
        return symbol.to_uppercase();
    }

    let symbol = symbol.to_uppercase();
    if let Some(base) = symbol.strip_suffix("USDC") {
        return format!("{base}-USDC");
    }
    if let Some(base) = symbol.strip_suffix("USDT") {
        return format!("{base}-USD");
    }
    if let Some(base) = symbol.strip_suffix("USD") {
        return format!("{base}-USD");
    }

    warn!(symbol = %symbol, "could not map symbol to Coinbase form, using as-is");
    symbol
}

/// Converts a canonical symbol to the slash form Kraken quotes in,
/// e.g. `BTCUSDT` -> `BTC/USD`.
#[must_use]
pub fn slash_symbol(symbol: &str) -> String {
    if symbol.contains('/') {
        return symbol.to_uppercase();
    }

    let symbol = symbol.to_uppercase();
    if let Some(base) = symbol.strip_suffix("USDT") {
        return format!("{base}/USD");
    }
    if let Some(base) = symbol.strip_suffix("USD") {
        return format!("{base}/USD");
    }
    for quote in ["EUR", "GBP"] {
        if let Some(base) = symbol.strip_suffix(quote) {
            return format!("{base}/{quote}");
        }
    }

    warn!(symbol = %symbol, "could not map symbol to Kraken form, using as-is");
    symbol
}

/// Strips the quote suffix for venues that key perpetuals by coin alone,
/// e.g. `BTCUSDT` -> `BTC`. Used by Hyperliquid.
#[must_use]
pub fn coin_symbol(symbol: &str) -> String {
    let symbol = symbol.to_uppercase();
    symbol
        .strip_suffix("USDT")
        .unwrap_or(&symbol)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dash_symbol() {
        assert_eq!(dash_symbol("BTCUSDT"), "BTC-USDT");
        assert_eq!(dash_symbol("ETHUSDC"), "ETH-USDC");
        assert_eq!(dash_symbol("SOLUSD"), "SOL-USD");
        assert_eq!(dash_symbol("btc-usdt"), "BTC-USDT");
    }

    #[test]
    fn test_dash_symbol_unknown_suffix_passes_through() {
        assert_eq!(dash_symbol("BTCEUR"), "BTCEUR");
    }

    #[test]
    fn test_dash_usd_symbol() {
        assert_eq!(dash_usd_symbol("BTCUSDT"), "BTC-USD");
        assert_eq!(dash_usd_symbol("ETHUSD"), "ETH-USD");
        assert_eq!(dash_usd_symbol("SOLUSDC"), "SOL-USDC");
        assert_eq!(dash_usd_symbol("BTC-USD"), "BTC-USD");
    }

    #[test]
    fn test_slash_symbol() {
        assert_eq!(slash_symbol("BTCUSDT"), "BTC/USD");
        assert_eq!(slash_symbol("ETHEUR"), "ETH/EUR");
        assert_eq!(slash_symbol("DOTGBP"), "DOT/GBP");
        assert_eq!(slash_symbol("BTC/USD"), "BTC/USD");
    }

    #[test]
    fn test_coin_symbol() {
        assert_eq!(coin_symbol("BTCUSDT"), "BTC");
        assert_eq!(coin_symbol("ETHUSDT"), "ETH");
        assert_eq!(coin_symbol("BTC"), "BTC");
    }
}
