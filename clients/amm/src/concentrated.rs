use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::Token;
use parking_lot::Mutex;
use tracing::{debug, info};
use utils::tick::{sqrt_price_at_tick, window_around};
use utils::{f64_to_u256, f64_to_u256_ceil, raw_to_f64, PairAmounts};

use crate::math::{amounts_for_liquidity, liquidity_for_amounts};
use crate::{
    AmmAdapter, AmmError, AmmKind, ConcentratedVenue, DepositQuote, PositionData, ReservesSnapshot,
    TickRange,
};

/// Adapter over a tick-ranged pool. The joint's position lives in one window of
/// `(2 * ticks_from_current + 1) * tick_spacing` ticks that is moved by
/// [`AmmAdapter::recenter_range`].
pub struct ConcentratedAdapter {
    venue: Arc<dyn ConcentratedVenue>,
    token_a: Token,
    token_b: Token,
    a_is_token0: bool,
    ticks_from_current: i32,
    range: Mutex<Option<TickRange>>,
}

impl ConcentratedAdapter {
    pub fn new(
        venue: Arc<dyn ConcentratedVenue>,
        token_a: Token,
        token_b: Token,
        ticks_from_current: i32,
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
            ticks_from_current,
            range: Mutex::new(None),
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

    async fn window(&self, ticks_from_current: i32) -> Result<TickRange, AmmError> {
        let slot0 = self.venue.slot0().await?;
        let (lower, upper) = window_around(slot0.tick, ticks_from_current, self.venue.tick_spacing());
        Ok(TickRange::new(lower, upper))
    }

    /// Current window, or the one a deposit would open right now.
    async fn active_or_next_range(&self) -> Result<TickRange, AmmError> {
        let current = *self.range.lock();
        match current {
            Some(range) => Ok(range),
            None => self.window(self.ticks_from_current).await,
        }
    }

    fn sqrt_bounds(range: TickRange) -> (f64, f64) {
        (sqrt_price_at_tick(range.lower), sqrt_price_at_tick(range.upper))
    }

    async fn amounts_in_range(&self, range: TickRange, liquidity: f64) -> Result<PairAmounts, AmmError> {
        let slot0 = self.venue.slot0().await?;
        let (sqrt_lower, sqrt_upper) = Self::sqrt_bounds(range);
        let (amount0, amount1) = amounts_for_liquidity(slot0.sqrt_price, sqrt_lower, sqrt_upper, liquidity);
        Ok(self.from_venue(f64_to_u256(amount0), f64_to_u256(amount1)))
    }

    fn require_range(&self) -> Result<TickRange, AmmError> {
        (*self.range.lock()).ok_or(AmmError::InvalidRange { lower: 0, upper: 0 })
    }
}

#[async_trait]
impl AmmAdapter for ConcentratedAdapter {
    fn kind(&self) -> AmmKind {
        AmmKind::Concentrated
    }

    fn token_a(&self) -> &Token {
        &self.token_a
    }

    fn token_b(&self) -> &Token {
        &self.token_b
    }

    async fn reserves(&self) -> Result<ReservesSnapshot, AmmError> {
        let slot0 = self.venue.slot0().await?;
        let address = self.venue.address();
        let price0 = slot0.sqrt_price * slot0.sqrt_price;
        Ok(ReservesSnapshot {
            reserve_a: self.token_a.balance_of(address),
            reserve_b: self.token_b.balance_of(address),
            price: if self.a_is_token0 { price0 } else { 1.0 / price0 },
            tick: Some(slot0.tick),
        })
    }

    async fn current_ratio(&self) -> Result<f64, AmmError> {
        let range = self.active_or_next_range().await?;
        let slot0 = self.venue.slot0().await?;
        let (sqrt_lower, sqrt_upper) = Self::sqrt_bounds(range);
        let (unit0, unit1) = amounts_for_liquidity(slot0.sqrt_price, sqrt_lower, sqrt_upper, 1.0);
        let (a, b) = if self.a_is_token0 { (unit0, unit1) } else { (unit1, unit0) };
        Ok(if a > 0.0 { b / a } else { f64::INFINITY })
    }

    async fn quote_deposit(&self, desired: PairAmounts) -> Result<DepositQuote, AmmError> {
        let range = self.active_or_next_range().await?;
        let slot0 = self.venue.slot0().await?;
        let (sqrt_lower, sqrt_upper) = Self::sqrt_bounds(range);
        let (desired0, desired1) = self.to_venue(desired);
        let liquidity = liquidity_for_amounts(
            slot0.sqrt_price,
            sqrt_lower,
            sqrt_upper,
            raw_to_f64(desired0),
            raw_to_f64(desired1),
        );
        if !(liquidity >= 1.0) {
            return Ok(DepositQuote::default());
        }
        let (amount0, amount1) = amounts_for_liquidity(slot0.sqrt_price, sqrt_lower, sqrt_upper, liquidity);
        let used = self.from_venue(
            f64_to_u256_ceil(amount0).min(desired0),
            f64_to_u256_ceil(amount1).min(desired1),
        );
        Ok(DepositQuote {
            used,
            liquidity: U256::from(liquidity as u128),
        })
    }

    async fn deposit(
        &self,
        owner: Address,
        desired: PairAmounts,
        min_liquidity: U256,
    ) -> Result<DepositQuote, AmmError> {
        let range = self.active_or_next_range().await?;
        let quote = self.quote_deposit(desired).await?;
        if quote.liquidity < min_liquidity || quote.liquidity.is_zero() {
            return Err(AmmError::SlippageExceeded {
                received: quote.liquidity,
                minimum: min_liquidity,
            });
        }
        let receipt = self.venue.mint(owner, range, self.to_venue(desired)).await?;
        *self.range.lock() = Some(range);
        let used = self.from_venue(receipt.amount0, receipt.amount1);
        debug!(%owner, lower = range.lower, upper = range.upper, used = %used, liquidity = receipt.liquidity, "concentrated deposit");
        Ok(DepositQuote {
            used,
            liquidity: U256::from(receipt.liquidity),
        })
    }

    async fn amounts_for_liquidity(&self, liquidity: U256) -> Result<PairAmounts, AmmError> {
        let range = match *self.range.lock() {
            Some(range) => range,
            None => return Ok(PairAmounts::ZERO),
        };
        self.amounts_in_range(range, raw_to_f64(liquidity)).await
    }

    async fn burn(
        &self,
        owner: Address,
        liquidity: U256,
        min_out: PairAmounts,
    ) -> Result<PairAmounts, AmmError> {
        let range = self.require_range()?;
        let expected = self.amounts_in_range(range, raw_to_f64(liquidity)).await?;
        for (received, minimum) in [(expected.a, min_out.a), (expected.b, min_out.b)] {
            if received < minimum {
                return Err(AmmError::SlippageExceeded { received, minimum });
            }
        }
        let amount = u128::try_from(liquidity).map_err(|_| AmmError::InsufficientLiquidity)?;
        let (amount0, amount1) = self.venue.burn(owner, range, amount).await?;
        Ok(self.from_venue(amount0, amount1))
    }

    async fn collect(&self, owner: Address) -> Result<PairAmounts, AmmError> {
        let range = match *self.range.lock() {
            Some(range) => range,
            None => return Ok(PairAmounts::ZERO),
        };
        let (amount0, amount1) = self.venue.collect(owner, range).await?;
        Ok(self.from_venue(amount0, amount1))
    }

    async fn withdraw(
        &self,
        owner: Address,
        liquidity: U256,
        min_out: PairAmounts,
    ) -> Result<PairAmounts, AmmError> {
        self.burn(owner, liquidity, min_out).await?;
        self.collect(owner).await
    }

    async fn position(&self, owner: Address) -> Result<PositionData, AmmError> {
        let range = match *self.range.lock() {
            Some(range) => range,
            None => return Ok(PositionData::default()),
        };
        let position = self.venue.position(owner, range).await?;
        Ok(PositionData {
            liquidity: U256::from(position.liquidity),
            range: Some(range),
            withdrawable: self.amounts_in_range(range, position.liquidity as f64).await?,
            collectable: self.from_venue(position.owed0, position.owed1),
        })
    }

    fn liquidity_token(&self) -> Option<Token> {
        None
    }

    fn range(&self) -> Option<TickRange> {
        *self.range.lock()
    }

    async fn in_range(&self) -> Result<bool, AmmError> {
        let range = match *self.range.lock() {
            Some(range) => range,
            None => return Ok(true),
        };
        let slot0 = self.venue.slot0().await?;
        Ok(range.contains(slot0.tick))
    }

    async fn recenter_range(
        &self,
        owner: Address,
        ticks_from_current: i32,
    ) -> Result<Option<TickRange>, AmmError> {
        let previous = *self.range.lock();
        if let Some(range) = previous {
            let held = self.venue.position(owner, range).await?;
            if held.liquidity > 0 || !held.owed0.is_zero() || !held.owed1.is_zero() {
                return Err(AmmError::PositionNotEmpty);
            }
        }
        let next = self.window(ticks_from_current).await?;
        *self.range.lock() = Some(next);
        info!(
            previous_lower = previous.map(|r| r.lower),
            previous_upper = previous.map(|r| r.upper),
            lower = next.lower,
            upper = next.upper,
            "recentered tick window"
        );
        Ok(Some(next))
    }
}
