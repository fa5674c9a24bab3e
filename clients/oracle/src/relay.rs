use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::{OracleError, PriceOracle};

/// Oracle whose price is pushed by a relayer.
#[derive(Debug, Default)]
pub struct RelayOracle {
    price: RwLock<Option<f64>>,
}

impl RelayOracle {
    pub fn new(price: f64) -> Self {
        Self {
            price: RwLock::new(Some(price)),
        }
    }

    /// Oracle with no price relayed yet.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn relay(&self, price: f64) {
        debug!(price, "relayed price");
        *self.price.write() = Some(price);
    }
}

#[async_trait]
impl PriceOracle for RelayOracle {
    async fn spot_price(&self) -> Result<f64, OracleError> {
        match *self.price.read() {
            Some(price) if price.is_finite() && price > 0.0 => Ok(price),
            _ => Err(OracleError::Unavailable),
        }
    }
}
