use std::collections::{BTreeMap, HashMap};

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::{Token, TokenError};
use parking_lot::Mutex;
use tracing::debug;
use utils::tick::{sqrt_price_at_tick, tick_at_sqrt_price, MAX_TICK, MIN_TICK};
use utils::{f64_to_u256, f64_to_u256_ceil, raw_to_f64};

use crate::math::{amounts_for_liquidity, liquidity_for_amounts};
use crate::{AmmError, ConcentratedVenue, MintReceipt, Slot0, SwapVenue, TickRange, VenuePosition};

const MAX_SWAP_STEPS: usize = 10_000;

#[derive(Debug, Clone, Default)]
struct TickInfo {
    liquidity_gross: f64,
    liquidity_net: f64,
    fee_outside0: f64,
    fee_outside1: f64,
}

#[derive(Debug, Clone, Default)]
struct PositionInfo {
    liquidity: f64,
    fee_inside_last0: f64,
    fee_inside_last1: f64,
    owed0: f64,
    owed1: f64,
}

#[derive(Debug, Clone)]
struct PoolState {
    sqrt_price: f64,
    tick: i32,
    liquidity: f64,
    fee_growth_global0: f64,
    fee_growth_global1: f64,
    ticks: BTreeMap<i32, TickInfo>,
    positions: HashMap<(Address, i32, i32), PositionInfo>,
}

#[derive(Debug, Clone, Copy, Default)]
struct SwapOutcome {
    amount_in: f64,
    amount_out: f64,
}

impl PoolState {
    fn fee_growth_inside(&self, lower: i32, upper: i32) -> (f64, f64) {
        let lo = self.ticks.get(&lower).cloned().unwrap_or_default();
        let hi = self.ticks.get(&upper).cloned().unwrap_or_default();
        let (g0, g1) = (self.fee_growth_global0, self.fee_growth_global1);
        let (below0, below1) = if self.tick >= lower {
            (lo.fee_outside0, lo.fee_outside1)
        } else {
            (g0 - lo.fee_outside0, g1 - lo.fee_outside1)
        };
        let (above0, above1) = if self.tick < upper {
            (hi.fee_outside0, hi.fee_outside1)
        } else {
            (g0 - hi.fee_outside0, g1 - hi.fee_outside1)
        };
        (g0 - below0 - above0, g1 - below1 - above1)
    }

    fn update_tick(&mut self, tick: i32, delta: f64, upper: bool) {
        let current = self.tick;
        let (g0, g1) = (self.fee_growth_global0, self.fee_growth_global1);
        let info = self.ticks.entry(tick).or_insert_with(|| {
            if tick <= current {
                TickInfo {
                    fee_outside0: g0,
                    fee_outside1: g1,
                    ..TickInfo::default()
                }
            } else {
                TickInfo::default()
            }
        });
        info.liquidity_gross += delta;
        info.liquidity_net += if upper { -delta } else { delta };
    }

    fn prune_tick(&mut self, tick: i32) {
        if self
            .ticks
            .get(&tick)
            .is_some_and(|info| info.liquidity_gross <= 1e-9)
        {
            self.ticks.remove(&tick);
        }
    }

    /// Accrues fees into the position, then applies `delta` liquidity.
    fn modify_position(&mut self, owner: Address, range: TickRange, delta: f64) {
        self.update_tick(range.lower, delta, false);
        self.update_tick(range.upper, delta, true);
        let (inside0, inside1) = self.fee_growth_inside(range.lower, range.upper);
        let position = self
            .positions
            .entry((owner, range.lower, range.upper))
            .or_insert_with(|| PositionInfo {
                fee_inside_last0: inside0,
                fee_inside_last1: inside1,
                ..PositionInfo::default()
            });
        position.owed0 += position.liquidity * (inside0 - position.fee_inside_last0);
        position.owed1 += position.liquidity * (inside1 - position.fee_inside_last1);
        position.fee_inside_last0 = inside0;
        position.fee_inside_last1 = inside1;
        position.liquidity = (position.liquidity + delta).max(0.0);
        if range.contains(self.tick) {
            self.liquidity = (self.liquidity + delta).max(0.0);
        }
        if delta < 0.0 {
            self.prune_tick(range.lower);
            self.prune_tick(range.upper);
        }
    }

    fn pending_fees(&self, owner: Address, range: TickRange) -> Option<(f64, f64, &PositionInfo)> {
        let position = self.positions.get(&(owner, range.lower, range.upper))?;
        let (inside0, inside1) = self.fee_growth_inside(range.lower, range.upper);
        Some((
            position.liquidity * (inside0 - position.fee_inside_last0),
            position.liquidity * (inside1 - position.fee_inside_last1),
            position,
        ))
    }

    fn cross(&mut self, tick: i32) -> f64 {
        let (g0, g1) = (self.fee_growth_global0, self.fee_growth_global1);
        match self.ticks.get_mut(&tick) {
            Some(info) => {
                info.fee_outside0 = g0 - info.fee_outside0;
                info.fee_outside1 = g1 - info.fee_outside1;
                info.liquidity_net
            }
            None => 0.0,
        }
    }

    /// Exact-input swap stepping across initialized ticks, stopping at `sqrt_limit`.
    fn swap(&mut self, zero_for_one: bool, amount_in: f64, sqrt_limit: f64, fee: f64) -> SwapOutcome {
        let mut outcome = SwapOutcome::default();
        let mut remaining = amount_in;
        for _ in 0..MAX_SWAP_STEPS {
            if remaining <= 0.0 || self.sqrt_price == sqrt_limit {
                break;
            }
            let next_tick = if zero_for_one {
                self.ticks
                    .range(..=self.tick)
                    .next_back()
                    .map(|(t, _)| *t)
                    .unwrap_or(MIN_TICK)
            } else {
                self.ticks
                    .range(self.tick + 1..)
                    .next()
                    .map(|(t, _)| *t)
                    .unwrap_or(MAX_TICK)
            };
            let sqrt_next = sqrt_price_at_tick(next_tick);
            let sqrt_target = if zero_for_one {
                sqrt_next.max(sqrt_limit)
            } else {
                sqrt_next.min(sqrt_limit)
            };

            let liquidity = self.liquidity;
            let available = remaining * (1.0 - fee);
            let (sqrt_new, step_in, step_fee, step_out) = if liquidity <= 0.0 {
                (sqrt_target, 0.0, 0.0, 0.0)
            } else if zero_for_one {
                let max_in = liquidity * (1.0 / sqrt_target - 1.0 / self.sqrt_price);
                let (sqrt_new, step_in, step_fee) = if available >= max_in {
                    (sqrt_target, max_in, max_in * fee / (1.0 - fee))
                } else {
                    let sqrt_new = 1.0 / (1.0 / self.sqrt_price + available / liquidity);
                    (sqrt_new, available, remaining - available)
                };
                let out = liquidity * (self.sqrt_price - sqrt_new);
                (sqrt_new, step_in, step_fee, out)
            } else {
                let max_in = liquidity * (sqrt_target - self.sqrt_price);
                let (sqrt_new, step_in, step_fee) = if available >= max_in {
                    (sqrt_target, max_in, max_in * fee / (1.0 - fee))
                } else {
                    let sqrt_new = self.sqrt_price + available / liquidity;
                    (sqrt_new, available, remaining - available)
                };
                let out = liquidity * (1.0 / self.sqrt_price - 1.0 / sqrt_new);
                (sqrt_new, step_in, step_fee, out)
            };

            let reached_target = sqrt_new == sqrt_target;
            remaining = if reached_target {
                (remaining - step_in - step_fee).max(0.0)
            } else {
                0.0
            };
            outcome.amount_in += step_in + step_fee;
            outcome.amount_out += step_out.max(0.0);
            if liquidity > 0.0 {
                if zero_for_one {
                    self.fee_growth_global0 += step_fee / liquidity;
                } else {
                    self.fee_growth_global1 += step_fee / liquidity;
                }
            }
            self.sqrt_price = sqrt_new;

            if reached_target && sqrt_target == sqrt_next {
                let net = self.cross(next_tick);
                if zero_for_one {
                    self.liquidity = (self.liquidity - net).max(0.0);
                    self.tick = next_tick - 1;
                } else {
                    self.liquidity = (self.liquidity + net).max(0.0);
                    self.tick = next_tick;
                }
                if next_tick == MIN_TICK || next_tick == MAX_TICK {
                    break;
                }
            } else {
                self.tick = tick_at_sqrt_price(sqrt_new);
            }
        }
        outcome
    }
}

/// Concentrated-liquidity pool with per-position fee accounting.
///
/// Prices, liquidity and fee growth are tracked in f64; token movements are rounded in
/// the pool's favour (inputs up, outputs down).
pub struct ConcentratedPool {
    address: Address,
    token0: Token,
    token1: Token,
    fee: f64,
    tick_spacing: i32,
    state: Mutex<PoolState>,
}

impl ConcentratedPool {
    /// `price` is raw `token_y` per raw `token_x`; the pool orders its tokens by address.
    pub fn new(
        address: Address,
        token_x: Token,
        token_y: Token,
        fee_pips: u32,
        tick_spacing: i32,
        price: f64,
    ) -> Self {
        let (token0, token1, price0) = if token_x.address() < token_y.address() {
            (token_x, token_y, price)
        } else {
            (token_y, token_x, 1.0 / price)
        };
        let sqrt_price = price0.sqrt();
        Self {
            address,
            token0,
            token1,
            fee: fee_pips as f64 / 1_000_000.0,
            tick_spacing,
            state: Mutex::new(PoolState {
                sqrt_price,
                tick: tick_at_sqrt_price(sqrt_price),
                liquidity: 0.0,
                fee_growth_global0: 0.0,
                fee_growth_global1: 0.0,
                ticks: BTreeMap::new(),
                positions: HashMap::new(),
            }),
        }
    }

    fn direction(&self, token_in: Address) -> Result<bool, AmmError> {
        if token_in == self.token0.address() {
            Ok(true)
        } else if token_in == self.token1.address() {
            Ok(false)
        } else {
            Err(AmmError::UnknownToken(token_in))
        }
    }

    fn validate(&self, range: TickRange) -> Result<(), AmmError> {
        let aligned = range.lower % self.tick_spacing == 0 && range.upper % self.tick_spacing == 0;
        if range.lower >= range.upper || !aligned || range.lower < MIN_TICK || range.upper > MAX_TICK {
            return Err(AmmError::InvalidRange {
                lower: range.lower,
                upper: range.upper,
            });
        }
        Ok(())
    }

    fn default_limit(zero_for_one: bool) -> f64 {
        if zero_for_one {
            sqrt_price_at_tick(MIN_TICK)
        } else {
            sqrt_price_at_tick(MAX_TICK)
        }
    }

    /// Sells up to `amount_in`, stopping early if the price reaches `sqrt_price_limit`.
    ///
    /// # Returns
    /// `(amount_in_used, amount_out)`
    pub fn swap_with_limit(
        &self,
        trader: Address,
        token_in: Address,
        amount_in: U256,
        sqrt_price_limit: Option<f64>,
    ) -> Result<(U256, U256), AmmError> {
        let zero_for_one = self.direction(token_in)?;
        let mut state = self.state.lock();
        let limit = sqrt_price_limit.unwrap_or_else(|| Self::default_limit(zero_for_one));
        let valid_limit = if zero_for_one {
            limit < state.sqrt_price
        } else {
            limit > state.sqrt_price
        };
        if !valid_limit || amount_in.is_zero() {
            return Ok((U256::ZERO, U256::ZERO));
        }

        let mut next = state.clone();
        let outcome = next.swap(zero_for_one, raw_to_f64(amount_in), limit, self.fee);
        let (input, output) = if zero_for_one {
            (&self.token0, &self.token1)
        } else {
            (&self.token1, &self.token0)
        };
        let used = f64_to_u256_ceil(outcome.amount_in).min(amount_in);
        let out = f64_to_u256(outcome.amount_out).min(output.balance_of(self.address));

        input.transfer(trader, self.address, used)?;
        output.transfer(self.address, trader, out)?;
        *state = next;
        debug!(
            pool = %self.address,
            token_in = input.symbol(),
            amount_in = %used,
            amount_out = %out,
            tick = state.tick,
            "swap"
        );
        Ok((used, out))
    }

    pub fn tick(&self) -> i32 {
        self.state.lock().tick
    }
}

#[async_trait]
impl SwapVenue for ConcentratedPool {
    fn address(&self) -> Address {
        self.address
    }

    fn tokens(&self) -> (Token, Token) {
        (self.token0.clone(), self.token1.clone())
    }

    async fn spot_price(&self, base: Address) -> Result<f64, AmmError> {
        let zero_for_one = self.direction(base)?;
        let sqrt_price = self.state.lock().sqrt_price;
        let price = sqrt_price * sqrt_price;
        Ok(if zero_for_one { price } else { 1.0 / price })
    }

    async fn quote_exact_in(&self, token_in: Address, amount_in: U256) -> Result<U256, AmmError> {
        let zero_for_one = self.direction(token_in)?;
        let mut state = self.state.lock().clone();
        let outcome = state.swap(
            zero_for_one,
            raw_to_f64(amount_in),
            Self::default_limit(zero_for_one),
            self.fee,
        );
        let output = if zero_for_one { &self.token1 } else { &self.token0 };
        Ok(f64_to_u256(outcome.amount_out).min(output.balance_of(self.address)))
    }

    async fn swap_exact_in(
        &self,
        trader: Address,
        token_in: Address,
        amount_in: U256,
        min_out: U256,
    ) -> Result<U256, AmmError> {
        let quoted = self.quote_exact_in(token_in, amount_in).await?;
        if quoted < min_out {
            return Err(AmmError::SlippageExceeded {
                received: quoted,
                minimum: min_out,
            });
        }
        let (_, out) = self.swap_with_limit(trader, token_in, amount_in, None)?;
        if out < min_out {
            return Err(AmmError::SlippageExceeded {
                received: out,
                minimum: min_out,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl ConcentratedVenue for ConcentratedPool {
    fn tick_spacing(&self) -> i32 {
        self.tick_spacing
    }

    async fn slot0(&self) -> Result<Slot0, AmmError> {
        let state = self.state.lock();
        Ok(Slot0 {
            sqrt_price: state.sqrt_price,
            tick: state.tick,
        })
    }

    async fn liquidity(&self) -> Result<u128, AmmError> {
        Ok(self.state.lock().liquidity as u128)
    }

    async fn mint(
        &self,
        owner: Address,
        range: TickRange,
        desired: (U256, U256),
    ) -> Result<MintReceipt, AmmError> {
        self.validate(range)?;
        let mut state = self.state.lock();
        let (sqrt_lower, sqrt_upper) = (sqrt_price_at_tick(range.lower), sqrt_price_at_tick(range.upper));
        let liquidity = liquidity_for_amounts(
            state.sqrt_price,
            sqrt_lower,
            sqrt_upper,
            raw_to_f64(desired.0),
            raw_to_f64(desired.1),
        );
        if !(liquidity >= 1.0) {
            return Err(AmmError::ZeroAmount);
        }
        let (owed0, owed1) = amounts_for_liquidity(state.sqrt_price, sqrt_lower, sqrt_upper, liquidity);
        let amount0 = f64_to_u256_ceil(owed0).min(desired.0);
        let amount1 = f64_to_u256_ceil(owed1).min(desired.1);

        for (token, amount) in [(&self.token0, amount0), (&self.token1, amount1)] {
            let balance = token.balance_of(owner);
            if balance < amount {
                return Err(TokenError::InsufficientBalance {
                    symbol: token.symbol().to_string(),
                    account: owner,
                    balance,
                    required: amount,
                }
                .into());
            }
        }
        self.token0.transfer(owner, self.address, amount0)?;
        self.token1.transfer(owner, self.address, amount1)?;
        state.modify_position(owner, range, liquidity);
        debug!(pool = %self.address, %owner, lower = range.lower, upper = range.upper, liquidity, %amount0, %amount1, "mint");
        Ok(MintReceipt {
            liquidity: liquidity as u128,
            amount0,
            amount1,
        })
    }

    async fn burn(
        &self,
        owner: Address,
        range: TickRange,
        liquidity: u128,
    ) -> Result<(U256, U256), AmmError> {
        let mut state = self.state.lock();
        let held = state
            .positions
            .get(&(owner, range.lower, range.upper))
            .map(|p| p.liquidity)
            .ok_or(AmmError::InsufficientLiquidity)?;
        let requested = liquidity as f64;
        if requested > held + 1.0 {
            return Err(AmmError::InsufficientLiquidity);
        }
        // the u128 view floors, so burning it all must clear the f64 remainder too
        let delta = if requested >= held - 1.0 { held } else { requested };
        let (sqrt_lower, sqrt_upper) = (sqrt_price_at_tick(range.lower), sqrt_price_at_tick(range.upper));
        let (principal0, principal1) = amounts_for_liquidity(state.sqrt_price, sqrt_lower, sqrt_upper, delta);
        let (amount0, amount1) = (principal0.floor().max(0.0), principal1.floor().max(0.0));
        state.modify_position(owner, range, -delta);
        if let Some(position) = state.positions.get_mut(&(owner, range.lower, range.upper)) {
            position.owed0 += amount0;
            position.owed1 += amount1;
        }
        Ok((f64_to_u256(amount0), f64_to_u256(amount1)))
    }

    async fn collect(&self, owner: Address, range: TickRange) -> Result<(U256, U256), AmmError> {
        let mut state = self.state.lock();
        if !state.positions.contains_key(&(owner, range.lower, range.upper)) {
            return Ok((U256::ZERO, U256::ZERO));
        }
        state.modify_position(owner, range, 0.0);
        let key = (owner, range.lower, range.upper);
        let (owed0, owed1) = state
            .positions
            .get(&key)
            .map(|p| (p.owed0, p.owed1))
            .unwrap_or_default();
        let amount0 = f64_to_u256(owed0).min(self.token0.balance_of(self.address));
        let amount1 = f64_to_u256(owed1).min(self.token1.balance_of(self.address));
        self.token0.transfer(self.address, owner, amount0)?;
        self.token1.transfer(self.address, owner, amount1)?;
        let mut empty = false;
        if let Some(position) = state.positions.get_mut(&key) {
            position.owed0 = (position.owed0 - raw_to_f64(amount0)).max(0.0);
            position.owed1 = (position.owed1 - raw_to_f64(amount1)).max(0.0);
            empty = position.liquidity <= 0.0 && position.owed0 < 1.0 && position.owed1 < 1.0;
        }
        if empty {
            state.positions.remove(&key);
        }
        debug!(pool = %self.address, %owner, %amount0, %amount1, "collect");
        Ok((amount0, amount1))
    }

    async fn position(&self, owner: Address, range: TickRange) -> Result<VenuePosition, AmmError> {
        let state = self.state.lock();
        Ok(match state.pending_fees(owner, range) {
            Some((fees0, fees1, position)) => VenuePosition {
                liquidity: position.liquidity as u128,
                owed0: f64_to_u256(position.owed0 + fees0),
                owed1: f64_to_u256(position.owed1 + fees1),
            },
            None => VenuePosition::default(),
        })
    }
}
