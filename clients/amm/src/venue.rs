use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::Token;

use crate::{AmmError, TickRange};

/// A pool that swaps between its two tokens.
#[async_trait]
pub trait SwapVenue: Send + Sync {
    /// Account holding the venue's reserves.
    fn address(&self) -> Address;

    /// `(token0, token1)` in the venue's own order.
    fn tokens(&self) -> (Token, Token);

    fn supports(&self, token_in: Address, token_out: Address) -> bool {
        let (token0, token1) = self.tokens();
        (token_in == token0.address() && token_out == token1.address())
            || (token_in == token1.address() && token_out == token0.address())
    }

    /// Raw units of the other token paid for one raw unit of `base`, before fees.
    async fn spot_price(&self, base: Address) -> Result<f64, AmmError>;

    async fn quote_exact_in(&self, token_in: Address, amount_in: U256) -> Result<U256, AmmError>;

    /// Smallest input that buys `amount_out`. The default bisects over `quote_exact_in`.
    async fn quote_exact_out(
        &self,
        token_in: Address,
        amount_out: U256,
    ) -> Result<U256, AmmError> {
        if amount_out.is_zero() {
            return Ok(U256::ZERO);
        }
        let mut high = amount_out.max(U256::from(1u64));
        let mut doublings = 0;
        while self.quote_exact_in(token_in, high).await? < amount_out {
            high = high.saturating_mul(U256::from(2u64));
            doublings += 1;
            if doublings > 128 {
                return Err(AmmError::InsufficientLiquidity);
            }
        }
        let mut low = U256::ZERO;
        while high - low > U256::from(1u64) {
            let mid = low + (high - low) / U256::from(2u64);
            if self.quote_exact_in(token_in, mid).await? >= amount_out {
                high = mid;
            } else {
                low = mid;
            }
        }
        Ok(high)
    }

    /// Sells `amount_in` of `token_in` from `trader`; fails unless at least `min_out` comes back.
    async fn swap_exact_in(
        &self,
        trader: Address,
        token_in: Address,
        amount_in: U256,
        min_out: U256,
    ) -> Result<U256, AmmError>;

    /// Buys exactly `amount_out`; fails when it would cost more than `max_in`.
    async fn swap_exact_out(
        &self,
        trader: Address,
        token_in: Address,
        amount_out: U256,
        max_in: U256,
    ) -> Result<U256, AmmError> {
        let required = self.quote_exact_out(token_in, amount_out).await?;
        if required > max_in {
            return Err(AmmError::ExcessiveInput {
                required,
                maximum: max_in,
            });
        }
        self.swap_exact_in(trader, token_in, required, amount_out)
            .await?;
        Ok(required)
    }
}

/// Proportional pool with a fungible LP token.
#[async_trait]
pub trait ConstantProductVenue: SwapVenue {
    fn lp_token(&self) -> Token;

    /// `(reserve0, reserve1)`
    async fn reserves(&self) -> Result<(U256, U256), AmmError>;

    /// Adds liquidity at the pool ratio, using at most the desired amounts.
    ///
    /// # Returns
    /// `(used0, used1, liquidity)`
    async fn add_liquidity(
        &self,
        provider: Address,
        desired: (U256, U256),
        minimum: (U256, U256),
    ) -> Result<(U256, U256, U256), AmmError>;

    async fn remove_liquidity(
        &self,
        provider: Address,
        liquidity: U256,
        minimum: (U256, U256),
    ) -> Result<(U256, U256), AmmError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot0 {
    pub sqrt_price: f64,
    pub tick: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintReceipt {
    pub liquidity: u128,
    pub amount0: U256,
    pub amount1: U256,
}

/// One owner's position over one tick range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VenuePosition {
    pub liquidity: u128,
    /// Burned principal plus fees, collectable now
    pub owed0: U256,
    pub owed1: U256,
}

/// Tick-ranged pool with burn/collect split.
#[async_trait]
pub trait ConcentratedVenue: SwapVenue {
    fn tick_spacing(&self) -> i32;

    async fn slot0(&self) -> Result<Slot0, AmmError>;

    /// Active liquidity at the current tick.
    async fn liquidity(&self) -> Result<u128, AmmError>;

    async fn mint(
        &self,
        owner: Address,
        range: TickRange,
        desired: (U256, U256),
    ) -> Result<MintReceipt, AmmError>;

    /// Removes liquidity; the principal becomes owed to the owner.
    async fn burn(
        &self,
        owner: Address,
        range: TickRange,
        liquidity: u128,
    ) -> Result<(U256, U256), AmmError>;

    /// Pays out everything owed to the owner, fees included.
    async fn collect(&self, owner: Address, range: TickRange) -> Result<(U256, U256), AmmError>;

    async fn position(&self, owner: Address, range: TickRange) -> Result<VenuePosition, AmmError>;
}
