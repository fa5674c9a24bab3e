use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::Token;
use tracing::debug;
use utils::{mul_div, raw_to_f64, PairAmounts};

use crate::sim::MINIMUM_LIQUIDITY;
use crate::{AmmAdapter, AmmError, AmmKind, ConstantProductVenue, DepositQuote, PositionData, ReservesSnapshot};

/// Adapter over a proportional pool: one fungible position, no price range.
pub struct ConstantProductAdapter {
    venue: Arc<dyn ConstantProductVenue>,
    token_a: Token,
    token_b: Token,
    a_is_token0: bool,
}

impl ConstantProductAdapter {
    pub fn new(
        venue: Arc<dyn ConstantProductVenue>,
        token_a: Token,
        token_b: Token,
    ) -> Result<Self, AmmError> {
        let (token0, token1) = venue.tokens();
        let a_is_token0 = if token0 == token_a && token1 == token_b {
            true
        } else if token1 == token_a && token0 == token_b {
            false
        } else {
            return Err(AmmError::UnknownToken(token_a.address()));
        };
        Ok(Self {
            venue,
            token_a,
            token_b,
            a_is_token0,
        })
    }

    fn to_venue(&self, amounts: PairAmounts) -> (U256, U256) {
        if self.a_is_token0 {
            (amounts.a, amounts.b)
        } else {
            (amounts.b, amounts.a)
        }
    }

    fn from_venue(&self, amount0: U256, amount1: U256) -> PairAmounts {
        if self.a_is_token0 {
            PairAmounts::new(amount0, amount1)
        } else {
            PairAmounts::new(amount1, amount0)
        }
    }

    async fn reserves_ab(&self) -> Result<PairAmounts, AmmError> {
        let (r0, r1) = self.venue.reserves().await?;
        Ok(self.from_venue(r0, r1))
    }
}

#[async_trait]
impl AmmAdapter for ConstantProductAdapter {
    fn kind(&self) -> AmmKind {
        AmmKind::ConstantProduct
    }

    fn token_a(&self) -> &Token {
        &self.token_a
    }

    fn token_b(&self) -> &Token {
        &self.token_b
    }

    async fn reserves(&self) -> Result<ReservesSnapshot, AmmError> {
        let reserves = self.reserves_ab().await?;
        if reserves.a.is_zero() {
            return Err(AmmError::InsufficientLiquidity);
        }
        Ok(ReservesSnapshot {
            reserve_a: reserves.a,
            reserve_b: reserves.b,
            price: raw_to_f64(reserves.b) / raw_to_f64(reserves.a),
            tick: None,
        })
    }

    async fn current_ratio(&self) -> Result<f64, AmmError> {
        self.current_price().await
    }

    async fn quote_deposit(&self, desired: PairAmounts) -> Result<DepositQuote, AmmError> {
        let reserves = self.reserves_ab().await?;
        let supply = self.venue.lp_token().total_supply();
        if reserves.a.is_zero() || reserves.b.is_zero() || supply.is_zero() {
            let liquidity = (desired.a * desired.b)
                .root(2)
                .saturating_sub(U256::from(MINIMUM_LIQUIDITY));
            return Ok(DepositQuote {
                used: desired,
                liquidity,
            });
        }
        let optimal_b = mul_div(desired.a, reserves.b, reserves.a).ok_or(AmmError::InsufficientLiquidity)?;
        let used = if optimal_b <= desired.b {
            PairAmounts::new(desired.a, optimal_b)
        } else {
            let optimal_a =
                mul_div(desired.b, reserves.a, reserves.b).ok_or(AmmError::InsufficientLiquidity)?;
            PairAmounts::new(optimal_a, desired.b)
        };
        let liquidity = (used.a * supply / reserves.a).min(used.b * supply / reserves.b);
        Ok(DepositQuote { used, liquidity })
    }

    async fn deposit(
        &self,
        owner: Address,
        desired: PairAmounts,
        min_liquidity: U256,
    ) -> Result<DepositQuote, AmmError> {
        let quote = self.quote_deposit(desired).await?;
        if quote.liquidity < min_liquidity {
            return Err(AmmError::SlippageExceeded {
                received: quote.liquidity,
                minimum: min_liquidity,
            });
        }
        let (used0, used1, liquidity) = self
            .venue
            .add_liquidity(owner, self.to_venue(desired), self.to_venue(quote.used))
            .await?;
        let used = self.from_venue(used0, used1);
        debug!(%owner, used = %used, %liquidity, "constant-product deposit");
        Ok(DepositQuote { used, liquidity })
    }

    async fn amounts_for_liquidity(&self, liquidity: U256) -> Result<PairAmounts, AmmError> {
        let supply = self.venue.lp_token().total_supply();
        if supply.is_zero() || liquidity.is_zero() {
            return Ok(PairAmounts::ZERO);
        }
        let reserves = self.reserves_ab().await?;
        Ok(PairAmounts::new(
            mul_div(liquidity, reserves.a, supply).unwrap_or_default(),
            mul_div(liquidity, reserves.b, supply).unwrap_or_default(),
        ))
    }

    async fn burn(
        &self,
        owner: Address,
        liquidity: U256,
        min_out: PairAmounts,
    ) -> Result<PairAmounts, AmmError> {
        let (amount0, amount1) = self
            .venue
            .remove_liquidity(owner, liquidity, self.to_venue(min_out))
            .await?;
        Ok(self.from_venue(amount0, amount1))
    }

    async fn collect(&self, _owner: Address) -> Result<PairAmounts, AmmError> {
        // fees are already in the reserves
        Ok(PairAmounts::ZERO)
    }

    async fn withdraw(
        &self,
        owner: Address,
        liquidity: U256,
        min_out: PairAmounts,
    ) -> Result<PairAmounts, AmmError> {
        self.burn(owner, liquidity, min_out).await
    }

    async fn position(&self, owner: Address) -> Result<PositionData, AmmError> {
        let liquidity = self.venue.lp_token().balance_of(owner);
        Ok(PositionData {
            liquidity,
            range: None,
            withdrawable: self.amounts_for_liquidity(liquidity).await?,
            collectable: PairAmounts::ZERO,
        })
    }

    fn liquidity_token(&self) -> Option<Token> {
        Some(self.venue.lp_token())
    }
}
