use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

use crate::{BinanceTickerConfig, OracleError, PriceOracle};

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

/// Spot price from the Binance public ticker endpoint.
pub struct BinanceTickerOracle {
    client: reqwest::Client,
    config: BinanceTickerConfig,
}

impl BinanceTickerOracle {
    pub fn new(client: reqwest::Client, config: BinanceTickerConfig) -> Self {
        Self { client, config }
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    /// Human price (whole quote per whole base) as published by the ticker.
    pub async fn ticker_price(&self) -> Result<f64, OracleError> {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("symbol", &self.config.symbol)
            .finish();
        let url = url::Url::parse(&format!(
            "{}/api/v3/ticker/price?{}",
            self.config.base_url.trim_end_matches('/'),
            query
        ))?;
        let body = self.client.get(url).send().await?.text().await?;
        let price = parse_ticker(&body, &self.config.symbol)?;
        debug!(symbol = %self.config.symbol, price, "ticker price");
        Ok(price)
    }
}

/// Parses a `/api/v3/ticker/price` body into a human price.
pub(crate) fn parse_ticker(body: &str, symbol: &str) -> Result<f64, OracleError> {
    let ticker: TickerPrice =
        serde_json::from_str(body).map_err(|e| OracleError::Parse(e.to_string()))?;
    if ticker.symbol != symbol {
        return Err(OracleError::Parse(format!(
            "expected symbol {}, got {}",
            symbol, ticker.symbol
        )));
    }
    let price = ticker
        .price
        .parse::<f64>()
        .map_err(|e| OracleError::Parse(format!("Failed to parse price: {}", e)))?;
    if price <= 0.0 {
        return Err(OracleError::Unavailable);
    }
    Ok(price)
}

#[async_trait]
impl PriceOracle for BinanceTickerOracle {
    async fn spot_price(&self) -> Result<f64, OracleError> {
        let price = self.ticker_price().await?;
        Ok(utils::human_to_raw_price(
            price,
            self.config.decimals_a,
            self.config.decimals_b,
        ))
    }
}
