use std::sync::Arc;

use alloy::primitives::{Address, U256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{AmmError, SwapVenue};

/// Which venue the joint prefers for A/B swaps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapRoute {
    /// The pool the position lives in
    #[default]
    Primary,
    /// The alternate stable pool
    Stable,
}

/// Routes swaps to the selected venue, falling back to any registered venue that
/// trades the pair.
pub struct SwapRouter {
    primary: Arc<dyn SwapVenue>,
    stable: Option<Arc<dyn SwapVenue>>,
    extra: Vec<Arc<dyn SwapVenue>>,
    route: RwLock<SwapRoute>,
}

impl SwapRouter {
    pub fn new(primary: Arc<dyn SwapVenue>) -> Self {
        Self {
            primary,
            stable: None,
            extra: Vec::new(),
            route: RwLock::new(SwapRoute::Primary),
        }
    }

    pub fn with_stable(mut self, stable: Arc<dyn SwapVenue>) -> Self {
        self.stable = Some(stable);
        self
    }

    /// Registers a venue for other pairs, e.g. reward token to A.
    pub fn with_venue(mut self, venue: Arc<dyn SwapVenue>) -> Self {
        self.extra.push(venue);
        self
    }

    pub fn route(&self) -> SwapRoute {
        *self.route.read()
    }

    pub fn set_route(&self, route: SwapRoute) -> Result<(), AmmError> {
        if route == SwapRoute::Stable && self.stable.is_none() {
            return Err(AmmError::NoRoute {
                token_in: Address::ZERO,
                token_out: Address::ZERO,
            });
        }
        info!(?route, "swap route selected");
        *self.route.write() = route;
        Ok(())
    }

    /// Venue that will serve `token_in -> token_out` under the current route.
    pub fn venue_for(&self, token_in: Address, token_out: Address) -> Result<Arc<dyn SwapVenue>, AmmError> {
        let preferred = match self.route() {
            SwapRoute::Stable => self.stable.iter().chain(std::iter::once(&self.primary)).collect::<Vec<_>>(),
            SwapRoute::Primary => std::iter::once(&self.primary).chain(self.stable.iter()).collect(),
        };
        preferred
            .into_iter()
            .chain(self.extra.iter())
            .find(|venue| venue.supports(token_in, token_out))
            .cloned()
            .ok_or(AmmError::NoRoute { token_in, token_out })
    }

    pub async fn quote_exact_in(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Result<U256, AmmError> {
        if amount_in.is_zero() {
            return Ok(U256::ZERO);
        }
        self.venue_for(token_in, token_out)?
            .quote_exact_in(token_in, amount_in)
            .await
    }

    pub async fn quote_exact_out(
        &self,
        token_in: Address,
        token_out: Address,
        amount_out: U256,
    ) -> Result<U256, AmmError> {
        self.venue_for(token_in, token_out)?
            .quote_exact_out(token_in, amount_out)
            .await
    }

    pub async fn swap_exact_in(
        &self,
        trader: Address,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        min_out: U256,
    ) -> Result<U256, AmmError> {
        if amount_in.is_zero() {
            return Ok(U256::ZERO);
        }
        let venue = self.venue_for(token_in, token_out)?;
        let out = venue.swap_exact_in(trader, token_in, amount_in, min_out).await?;
        debug!(venue = %venue.address(), %token_in, %token_out, %amount_in, %out, "routed swap");
        Ok(out)
    }

    pub async fn swap_exact_out(
        &self,
        trader: Address,
        token_in: Address,
        token_out: Address,
        amount_out: U256,
        max_in: U256,
    ) -> Result<U256, AmmError> {
        let venue = self.venue_for(token_in, token_out)?;
        venue.swap_exact_out(trader, token_in, amount_out, max_in).await
    }
}
