use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::Token;
use utils::PairAmounts;

use crate::{AmmError, AmmKind, DepositQuote, PositionData, ReservesSnapshot, TickRange};

/// One liquidity venue seen from the joint: amounts are always `(a, b)`.
#[async_trait]
pub trait AmmAdapter: Send + Sync {
    fn kind(&self) -> AmmKind;

    fn token_a(&self) -> &Token;

    fn token_b(&self) -> &Token;

    async fn reserves(&self) -> Result<ReservesSnapshot, AmmError>;

    /// Pool price in raw B per raw A.
    async fn current_price(&self) -> Result<f64, AmmError> {
        Ok(self.reserves().await?.price)
    }

    /// Raw B needed per raw A for a balanced deposit right now.
    async fn current_ratio(&self) -> Result<f64, AmmError>;

    async fn quote_deposit(&self, desired: PairAmounts) -> Result<DepositQuote, AmmError>;

    /// Deposits at most `desired` from `owner`; fails if fewer than `min_liquidity` units mint.
    async fn deposit(
        &self,
        owner: Address,
        desired: PairAmounts,
        min_liquidity: U256,
    ) -> Result<DepositQuote, AmmError>;

    /// Amounts `liquidity` units are worth at the current price.
    async fn amounts_for_liquidity(&self, liquidity: U256) -> Result<PairAmounts, AmmError>;

    /// Removes liquidity. Constant-product venues pay out immediately; concentrated
    /// venues leave the principal owed until [`AmmAdapter::collect`].
    async fn burn(
        &self,
        owner: Address,
        liquidity: U256,
        min_out: PairAmounts,
    ) -> Result<PairAmounts, AmmError>;

    /// Pays out owed principal and accrued fees.
    async fn collect(&self, owner: Address) -> Result<PairAmounts, AmmError>;

    /// Burns and collects in one step; returns everything paid to `owner`, fees included.
    async fn withdraw(
        &self,
        owner: Address,
        liquidity: U256,
        min_out: PairAmounts,
    ) -> Result<PairAmounts, AmmError>;

    /// Liquidity held directly by `owner`.
    async fn position(&self, owner: Address) -> Result<PositionData, AmmError>;

    /// Fungible liquidity token to stake, if the venue has one.
    fn liquidity_token(&self) -> Option<Token>;

    fn range(&self) -> Option<TickRange> {
        None
    }

    async fn in_range(&self) -> Result<bool, AmmError> {
        Ok(true)
    }

    /// Moves the window to `(2k + 1)` spacings around the current tick. Only legal once
    /// `owner` holds nothing in the old window.
    async fn recenter_range(
        &self,
        _owner: Address,
        _ticks_from_current: i32,
    ) -> Result<Option<TickRange>, AmmError> {
        Ok(None)
    }
}
