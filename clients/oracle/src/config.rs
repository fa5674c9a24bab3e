//! Configuration types for the HTTP price oracle.

use serde::{Deserialize, Serialize};

/// Configuration for BinanceTickerOracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceTickerConfig {
    /// Base URL for API endpoints (e.g., "https://api.binance.com")
    pub base_url: String,
    /// Ticker symbol (e.g., "ETHUSDT")
    pub symbol: String,
    /// Decimals of the base asset (A)
    pub decimals_a: u8,
    /// Decimals of the quote asset (B)
    pub decimals_b: u8,
}
