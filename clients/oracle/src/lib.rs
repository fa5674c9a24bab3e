//! Spot price sources for the joint.
//!
//! Every oracle quotes raw B base units per raw A base unit so it can be compared
//! directly with an AMM pool price.

mod binance;
mod config;
mod error;
mod relay;

use async_trait::async_trait;
use tracing::warn;

pub use binance::BinanceTickerOracle;
pub use config::BinanceTickerConfig;
pub use error::OracleError;
pub use relay::RelayOracle;

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current spot price in raw B per raw A.
    async fn spot_price(&self) -> Result<f64, OracleError>;
}

/// Fails when the oracle and pool prices disagree by more than `max_deviation_bps`.
///
/// # Returns
/// The oracle price when the two sources agree.
pub async fn cross_check(
    oracle: &dyn PriceOracle,
    pool_price: f64,
    max_deviation_bps: u64,
) -> Result<f64, OracleError> {
    let oracle_price = oracle.spot_price().await?;
    let deviation = utils::deviation_bps(oracle_price, pool_price);
    if deviation > max_deviation_bps {
        warn!(
            oracle_price,
            pool_price, deviation, max_deviation_bps, "oracle and pool price diverge"
        );
        return Err(OracleError::Deviation {
            oracle_price,
            pool_price,
            deviation_bps: deviation,
            max_bps: max_deviation_bps,
        });
    }
    Ok(oracle_price)
}
