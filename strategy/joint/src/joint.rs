//! The joint: owns the paired position and its hedge for one epoch at a time.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use clients_amm::{AmmAdapter, AmmError, AmmKind, DepositQuote, SwapRouter, TickRange};
use clients_erc20::Token;
use clients_hedge::{HedgeProvider, HedgeQuote, HedgeRequest};
use clients_oracle::{cross_check, PriceOracle};
use tracing::{debug, info, warn};
use utils::{
    deviation_bps, f64_to_u256, min_out, raw_to_f64, raw_to_human_price, u256_to_f64, Clock,
    PairAmounts, BPS,
};

use crate::config::{HedgeBudgetPolicy, JointConfig};
use crate::{
    Asset, Epoch, EpochPhase, EpochState, HarvestReport, JointError, JointSnapshot,
    RewardHarvester, Role, Settlement, StateViolation,
};

/// Attempts at finding a window that still holds the price after the balancing swap.
const MAX_RECENTER_ATTEMPTS: usize = 3;

/// Rebalancing swaps worth less than this many raw units of the bought asset are skipped.
const DUST: f64 = 1_000.0;

/// Collaborators the joint is wired to.
pub struct JointParts {
    pub amm: Arc<dyn AmmAdapter>,
    /// Protection venue; `None` runs every epoch unhedged
    pub hedge: Option<Arc<dyn HedgeProvider>>,
    pub oracle: Arc<dyn PriceOracle>,
    pub router: Arc<SwapRouter>,
    pub staking: Option<Arc<dyn clients_staking::StakingVenue>>,
    pub provider_a: Address,
    pub provider_b: Address,
}

/// Paired position of two providers, run one epoch at a time.
///
/// Owns the liquidity, its stake and the hedge while an epoch is open. Capital only
/// enters through [`Joint::forward`] and only leaves to the two providers.
pub struct Joint {
    /// Account holding the joint's balances at every venue
    pub(crate) address: Address,
    /// Live parameters; an open epoch keeps the copies it was opened with
    pub(crate) config: JointConfig,
    /// Asset A, token0 of the pool
    pub(crate) token_a: Token,
    /// Asset B, token1 of the pool
    pub(crate) token_b: Token,
    /// Liquidity venue
    pub(crate) amm: Arc<dyn AmmAdapter>,
    /// Protection venue; `None` runs every epoch unhedged
    pub(crate) hedge: Option<Arc<dyn HedgeProvider>>,
    /// Reference price for strikes, triggers and cross-checks
    pub(crate) oracle: Arc<dyn PriceOracle>,
    /// Swap routing for rebalances, reward conversion and manual swaps
    pub(crate) router: Arc<SwapRouter>,
    /// Staking and reward conversion
    pub(crate) harvester: RewardHarvester,
    pub(crate) clock: Arc<dyn Clock>,
    /// Provider lending asset A
    pub(crate) provider_a: Address,
    /// Provider lending asset B
    pub(crate) provider_b: Address,
    pub(crate) state: EpochState,
    /// Capital forwarded while idle, waiting for invest
    pub(crate) pending: PairAmounts,
    /// Id the next invest assigns
    pub(crate) next_epoch_id: u64,
    /// Epochs returned to idle so far
    pub(crate) settled_epochs: u64,
    /// Start of the harvest cooldown, in unix seconds
    pub(crate) last_harvest: u64,
    /// Governance override that ends the open epoch
    pub(crate) force_end: bool,
    pub(crate) last_settlement: Option<Settlement>,
}

/// Hedge invest would buy: the provider, the request and its quote.
type HedgePlan = (Arc<dyn HedgeProvider>, HedgeRequest, HedgeQuote);

/// Amount of one side to sell so both sides end with the same return on what they
/// provided.
///
/// With `x`/`y` provided and `a`/`b` held at price `p` (B per A), selling `s` A gives
/// `(a - s) / x == (b + s * p) / y`; selling B is symmetric.
pub fn rebalance_sell(provided: PairAmounts, current: PairAmounts, price: f64) -> Option<(Asset, U256)> {
    if provided.a.is_zero() || provided.b.is_zero() || !(price > 0.0) {
        return None;
    }
    let (x, y) = (raw_to_f64(provided.a), raw_to_f64(provided.b));
    let (a, b) = (raw_to_f64(current.a), raw_to_f64(current.b));
    let (lhs, rhs) = (a * y, x * b);
    let (asset, amount) = if lhs > rhs {
        let sell = (lhs - rhs) / (y + x * price);
        (Asset::A, f64_to_u256(sell).min(current.a))
    } else if rhs > lhs {
        let sell = (rhs - lhs) / (x + y / price);
        (Asset::B, f64_to_u256(sell).min(current.b))
    } else {
        return None;
    };
    (!amount.is_zero()).then_some((asset, amount))
}

impl Joint {
    /// Wires a joint to its venues after validating `config`.
    pub fn new(
        address: Address,
        config: JointConfig,
        parts: JointParts,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, JointError> {
        config.validate()?;
        parts.router.set_route(config.swap_route)?;
        let token_a = parts.amm.token_a().clone();
        let token_b = parts.amm.token_b().clone();
        let harvester = RewardHarvester::new(
            parts.staking,
            parts.router.clone(),
            token_a.clone(),
            token_b.clone(),
        );
        let now = clock.now();
        info!(
            joint = %address,
            token_a = token_a.symbol(),
            token_b = token_b.symbol(),
            amm = ?parts.amm.kind(),
            hedge = ?parts.hedge.as_ref().map(|h| h.kind()),
            "joint created"
        );
        Ok(Self {
            address,
            config,
            token_a,
            token_b,
            amm: parts.amm,
            hedge: parts.hedge,
            oracle: parts.oracle,
            router: parts.router,
            harvester,
            clock,
            provider_a: parts.provider_a,
            provider_b: parts.provider_b,
            state: EpochState::Idle,
            pending: PairAmounts::ZERO,
            next_epoch_id: 1,
            settled_epochs: 0,
            last_harvest: now,
            force_end: false,
            last_settlement: None,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &JointConfig {
        &self.config
    }

    /// Current phase of the epoch state machine.
    pub fn phase(&self) -> EpochPhase {
        self.state.phase()
    }

    pub fn state(&self) -> &EpochState {
        &self.state
    }

    /// The epoch in progress, `None` while idle.
    pub fn epoch(&self) -> Option<&Epoch> {
        self.state.epoch()
    }

    /// Capital forwarded since the last epoch, per side.
    pub fn pending(&self) -> PairAmounts {
        self.pending
    }

    /// Number of epochs that have returned to idle.
    ///
    /// Providers compare it with the count at their last report to find epochs they
    /// have not reported yet.
    pub fn settled_epochs(&self) -> u64 {
        self.settled_epochs
    }

    /// Outcome of the most recent epoch.
    pub fn last_settlement(&self) -> Option<&Settlement> {
        self.last_settlement.as_ref()
    }

    /// Token of one side of the pair.
    pub fn token(&self, asset: Asset) -> &Token {
        match asset {
            Asset::A => &self.token_a,
            Asset::B => &self.token_b,
        }
    }

    /// Provider currently lending `asset`.
    pub fn provider(&self, asset: Asset) -> Address {
        match asset {
            Asset::A => self.provider_a,
            Asset::B => self.provider_b,
        }
    }

    /// A and B held by the joint outside the pool.
    pub fn loose(&self) -> PairAmounts {
        PairAmounts::new(
            self.token_a.balance_of(self.address),
            self.token_b.balance_of(self.address),
        )
    }

    pub(crate) fn authorize(
        &self,
        caller: Address,
        roles: &[Role],
        action: &'static str,
    ) -> Result<(), StateViolation> {
        let allowed = roles.iter().any(|role| match role {
            Role::Governance => caller == self.config.governance,
            Role::Keeper => caller == self.config.keeper || caller == self.config.governance,
            Role::Provider => caller == self.provider_a || caller == self.provider_b,
        });
        if allowed {
            Ok(())
        } else {
            warn!(%caller, action, "unauthorized call");
            Err(StateViolation::Unauthorized { caller, action })
        }
    }

    fn provider_asset(&self, caller: Address) -> Asset {
        if caller == self.provider_a {
            Asset::A
        } else {
            Asset::B
        }
    }

    fn require_idle(&self, action: &'static str) -> Result<(), StateViolation> {
        match self.state.phase() {
            EpochPhase::Idle => Ok(()),
            phase => Err(StateViolation::WrongPhase { phase, action }),
        }
    }

    /// Hedge provider when hedging is switched on.
    fn hedging(&self) -> Option<&Arc<dyn HedgeProvider>> {
        self.hedge.as_ref().filter(|_| self.config.hedge.enabled)
    }

    fn slippage_bps(&self) -> u64 {
        self.config.slippage.max_slippage_bps
    }

    fn sides(&self, sell: Asset) -> (Address, Address) {
        match sell {
            Asset::A => (self.token_a.address(), self.token_b.address()),
            Asset::B => (self.token_b.address(), self.token_a.address()),
        }
    }

    /// Oracle price, or the pool price when the oracle has nothing.
    async fn reference_price(&self) -> Result<f64, JointError> {
        match self.oracle.spot_price().await {
            Ok(price) => Ok(price),
            Err(err) => {
                warn!(%err, "oracle unavailable, using pool price");
                Ok(self.amm.current_price().await?)
            }
        }
    }

    /// Takes `amount` of the caller's asset; legal only while idle.
    pub async fn forward(&mut self, caller: Address, amount: U256) -> Result<(), JointError> {
        self.authorize(caller, &[Role::Provider], "forward capital")?;
        self.require_idle("forward capital")?;
        let asset = self.provider_asset(caller);
        self.token(asset).transfer(caller, self.address, amount)?;
        match asset {
            Asset::A => self.pending.a += amount,
            Asset::B => self.pending.b += amount,
        }
        info!(provider = %caller, %asset, %amount, pending = %self.pending, "capital forwarded");
        Ok(())
    }

    /// Hands the caller's idle capital back.
    pub async fn withdraw_pending(&mut self, caller: Address) -> Result<U256, JointError> {
        self.authorize(caller, &[Role::Provider], "withdraw pending capital")?;
        self.require_idle("withdraw pending capital")?;
        let asset = self.provider_asset(caller);
        let amount = asset.of(self.pending);
        self.token(asset).transfer(self.address, caller, amount)?;
        match asset {
            Asset::A => self.pending.a = U256::ZERO,
            Asset::B => self.pending.b = U256::ZERO,
        }
        debug!(provider = %caller, %asset, %amount, "pending capital returned");
        Ok(amount)
    }

    /// True while idle with capital forwarded on both sides.
    pub fn ready_to_invest(&self) -> bool {
        self.state.phase() == EpochPhase::Idle && !self.pending.a.is_zero() && !self.pending.b.is_zero()
    }

    /// Hedge to buy for an epoch investing `notional` of A, or `None` to go unhedged.
    ///
    /// Fails when the premium is over budget and the policy says so.
    async fn plan_hedge(&self, notional: U256, pool_price: f64) -> Result<Option<HedgePlan>, JointError> {
        let Some(hedge) = self.hedging() else {
            return Ok(None);
        };
        let oracle_price =
            cross_check(self.oracle.as_ref(), pool_price, self.config.max_oracle_deviation_bps).await?;
        let budget =
            raw_to_f64(notional) * oracle_price * self.config.hedge.budget_bps as f64 / BPS as f64;
        let request = HedgeRequest {
            notional,
            range_bps: self.config.hedge.protection_range_bps,
            period_secs: self.config.period_secs,
            max_cost_value: budget,
        };
        let quote = hedge.quote(&request).await?;
        debug!(notional = %request.notional, cost = %quote.cost, cost_value = quote.cost_value, budget, "hedge quoted");
        if quote.cost_value <= budget {
            return Ok(Some((hedge.clone(), request, quote)));
        }
        match self.config.hedge.budget_policy {
            HedgeBudgetPolicy::Fail => Err(JointError::HedgeBudgetExceeded {
                cost: quote.cost_value,
                budget,
            }),
            HedgeBudgetPolicy::Unhedged => {
                warn!(cost = quote.cost_value, budget, "hedge over budget, investing unhedged");
                Ok(None)
            }
        }
    }

    /// Quotes everything invest would do with `available` and moves nothing.
    ///
    /// # Returns
    /// The hedge to buy and the deposit to make
    async fn plan_invest(
        &self,
        available: PairAmounts,
    ) -> Result<(Option<HedgePlan>, DepositQuote), JointError> {
        if let Some(epoch) = self.state.epoch() {
            return Err(StateViolation::EpochActive(epoch.id).into());
        }
        if available.a.is_zero() || available.b.is_zero() {
            return Err(StateViolation::NotFunded(available).into());
        }
        let pool_price = self.amm.current_price().await?;
        let matched = self.amm.quote_deposit(available).await?;
        let plan = self.plan_hedge(matched.used.a, pool_price).await?;

        let expected_cost = plan.as_ref().map(|(_, _, quote)| quote.cost).unwrap_or(PairAmounts::ZERO);
        let deposit = self
            .amm
            .quote_deposit(available.saturating_sub(expected_cost))
            .await?;
        if deposit.liquidity.is_zero() {
            return Err(AmmError::InsufficientLiquidity.into());
        }
        Ok((plan, deposit))
    }

    /// Runs invest's checks against `available` without touching any balance: the
    /// phase, both sides funded, the hedge premium against the budget and a non-empty
    /// deposit.
    pub async fn preview_invest(&self, available: PairAmounts) -> Result<(), JointError> {
        self.plan_invest(available).await.map(|_| ())
    }

    /// Opens an epoch with the forwarded capital: buys the hedge, deposits at the pool
    /// ratio, stakes the liquidity and hands the unmatched remainder back.
    ///
    /// Every check runs before the first transfer, so a failed invest leaves the
    /// forwarded capital pending.
    ///
    /// # Returns
    /// The new epoch's id
    pub async fn invest(&mut self, caller: Address) -> Result<u64, JointError> {
        self.authorize(caller, &[Role::Keeper], "invest")?;
        if let Some(epoch) = self.state.epoch() {
            return Err(StateViolation::EpochActive(epoch.id).into());
        }
        if !self.ready_to_invest() {
            return Err(StateViolation::NotFunded(self.pending).into());
        }

        let available = self.pending;
        if self.amm.kind() == AmmKind::Concentrated {
            // the last epoch's window may no longer hold the price
            self.amm
                .recenter_range(self.address, self.config.recenter.ticks_from_current)
                .await?;
        }
        let pool_price = self.amm.current_price().await?;
        let (plan, quote) = self.plan_invest(available).await?;
        let min_liquidity = min_out(quote.liquidity, self.slippage_bps());

        let (hedge_id, hedge_cost, entry_price) = match &plan {
            Some((hedge, request, quote)) => {
                let id = hedge.open(self.address, request).await?;
                (Some(id), hedge.cost(id).await?, quote.strike)
            }
            None => (None, PairAmounts::ZERO, pool_price),
        };
        let receipt = self
            .amm
            .deposit(self.address, available.saturating_sub(hedge_cost), min_liquidity)
            .await?;

        let staked = if self.harvester.can_stake(self.amm.liquidity_token().as_ref()) {
            self.harvester.stake(self.address, receipt.liquidity).await?;
            receipt.liquidity
        } else {
            U256::ZERO
        };

        let leftover = available.saturating_sub(receipt.used.saturating_add(hedge_cost));
        self.token_a.transfer(self.address, self.provider_a, leftover.a)?;
        self.token_b.transfer(self.address, self.provider_b, leftover.b)?;

        let now = self.clock.now();
        let id = self.next_epoch_id;
        let epoch = Epoch {
            id,
            started_at: now,
            period_secs: self.config.period_secs,
            min_time_to_maturity_secs: self.config.min_time_to_maturity_secs,
            protection_range_bps: self.config.hedge.protection_range_bps,
            hedge_budget_bps: self.config.hedge.budget_bps,
            entry_price,
            provided: available.saturating_sub(leftover),
            invested: receipt.used,
            liquidity: receipt.liquidity,
            staked,
            range: self.amm.range(),
            hedge: hedge_id,
            hedge_cost,
            hedge_payout: PairAmounts::ZERO,
            rewards_converted: PairAmounts::ZERO,
            recenters: 0,
        };
        info!(
            epoch = id,
            provided = %epoch.provided,
            invested = %epoch.invested,
            liquidity = %epoch.liquidity,
            hedge = ?hedge_id,
            hedge_cost = %hedge_cost,
            returned = %leftover,
            entry_price,
            "epoch opened"
        );
        self.next_epoch_id += 1;
        self.pending = PairAmounts::ZERO;
        self.last_harvest = now;
        self.force_end = false;
        self.state = EpochState::Open(epoch);
        Ok(id)
    }

    /// True once the open epoch should be closed: the period is over, the hedge is
    /// about to mature, the price left the protection range, or governance forced it.
    pub async fn should_end_epoch(&self) -> Result<bool, JointError> {
        let epoch = match &self.state {
            EpochState::Idle => return Ok(false),
            EpochState::Closing(_) => return Ok(true),
            EpochState::Open(epoch) | EpochState::Recentering(epoch) => epoch,
        };
        if self.force_end {
            return Ok(true);
        }
        let now = self.clock.now();
        if now >= epoch.ends_at() {
            debug!(epoch = epoch.id, now, ends_at = epoch.ends_at(), "epoch period elapsed");
            return Ok(true);
        }
        if let (Some(id), Some(hedge)) = (epoch.hedge, &self.hedge) {
            let remaining = hedge.time_to_maturity(id).await?;
            if remaining < epoch.min_time_to_maturity_secs {
                debug!(epoch = epoch.id, remaining, "hedge close to maturity");
                return Ok(true);
            }
        }
        let price = self.reference_price().await?;
        let moved = deviation_bps(epoch.entry_price, price);
        if moved > epoch.protection_range_bps {
            debug!(epoch = epoch.id, moved, range = epoch.protection_range_bps, "price left protection range");
            return Ok(true);
        }
        Ok(false)
    }

    /// True when a concentrated position has drifted out of its window, or a recenter
    /// is half done.
    pub async fn should_recenter(&self) -> Result<bool, JointError> {
        match self.state.phase() {
            EpochPhase::Recentering => Ok(true),
            EpochPhase::Open
                if self.amm.kind() == AmmKind::Concentrated && self.config.recenter.enabled =>
            {
                Ok(!self.amm.in_range().await?)
            }
            _ => Ok(false),
        }
    }

    /// Unstakes and withdraws the whole position into the joint.
    pub(crate) async fn unwind_position(&mut self) -> Result<PairAmounts, JointError> {
        let (staked, liquidity) = match self.state.epoch() {
            Some(epoch) => (epoch.staked, epoch.liquidity),
            None => return Ok(PairAmounts::ZERO),
        };
        if !staked.is_zero() {
            self.harvester.unstake(self.address, staked).await?;
            if let Some(epoch) = self.state.epoch_mut() {
                epoch.staked = U256::ZERO;
            }
        }
        if liquidity.is_zero() {
            return Ok(self.amm.collect(self.address).await?);
        }
        let expected = self.amm.amounts_for_liquidity(liquidity).await?;
        let bound = PairAmounts::new(
            min_out(expected.a, self.slippage_bps()),
            min_out(expected.b, self.slippage_bps()),
        );
        let out = self.amm.withdraw(self.address, liquidity, bound).await?;
        if let Some(epoch) = self.state.epoch_mut() {
            epoch.liquidity = U256::ZERO;
        }
        debug!(%liquidity, out = %out, "position withdrawn");
        Ok(out)
    }

    /// Closes the epoch's hedge into the joint.
    pub(crate) async fn close_hedge(&mut self) -> Result<PairAmounts, JointError> {
        let Some(id) = self.state.epoch().and_then(|epoch| epoch.hedge) else {
            return Ok(PairAmounts::ZERO);
        };
        let Some(hedge) = self.hedge.clone() else {
            return Ok(PairAmounts::ZERO);
        };
        let payout = hedge.close(id, self.address).await?;
        if let Some(epoch) = self.state.epoch_mut() {
            epoch.hedge = None;
            epoch.hedge_payout = epoch.hedge_payout.saturating_add(payout);
            info!(epoch = epoch.id, hedge = %id, payout = %payout, cost = %epoch.hedge_cost, "hedge closed");
        }
        Ok(payout)
    }

    /// Sells `amount` of `sell` for the other side with the configured bound.
    pub(crate) async fn swap(&self, sell: Asset, amount: U256) -> Result<U256, JointError> {
        if amount.is_zero() {
            return Ok(U256::ZERO);
        }
        let (token_in, token_out) = self.sides(sell);
        let quoted = self.router.quote_exact_in(token_in, token_out, amount).await?;
        if quoted.is_zero() {
            return Ok(U256::ZERO);
        }
        let out = self
            .router
            .swap_exact_in(self.address, token_in, token_out, amount, min_out(quoted, self.slippage_bps()))
            .await?;
        debug!(%sell, %amount, %out, "swapped");
        Ok(out)
    }

    /// Swaps loose A/B towards the ratio the active window wants.
    async fn swap_to_ratio(&self) -> Result<(), JointError> {
        let loose = self.loose();
        let price = self.amm.current_price().await?;
        let ratio = self.amm.current_ratio().await?;
        let (a, b) = (raw_to_f64(loose.a), raw_to_f64(loose.b));
        let target_a = if ratio.is_finite() {
            (a * price + b) / (price + ratio)
        } else {
            0.0
        };
        if target_a < a {
            self.swap(Asset::A, f64_to_u256(a - target_a).min(loose.a)).await?;
        } else {
            let excess_b = b - target_a * ratio;
            if excess_b > 0.0 {
                self.swap(Asset::B, f64_to_u256(excess_b).min(loose.b)).await?;
            }
        }
        Ok(())
    }

    /// Moves a concentrated position into a new window around the current tick.
    ///
    /// Resumable: a call that fails after withdrawing leaves the epoch in
    /// [`EpochPhase::Recentering`] and the next call picks up from there.
    pub async fn recenter(&mut self, caller: Address) -> Result<TickRange, JointError> {
        self.authorize(caller, &[Role::Keeper], "recenter")?;
        let phase = self.state.phase();
        if !matches!(phase, EpochPhase::Open | EpochPhase::Recentering) {
            return Err(StateViolation::WrongPhase { phase, action: "recenter" }.into());
        }
        if self.amm.kind() != AmmKind::Concentrated {
            return Err(StateViolation::Unsupported { action: "recenter" }.into());
        }
        if phase == EpochPhase::Open {
            self.unwind_position().await?;
            self.state = self.state.take().into_phase(EpochPhase::Recentering);
        }

        let width = self.config.recenter.ticks_from_current;
        let mut range = self.next_window(width).await?;
        for attempt in 1..=MAX_RECENTER_ATTEMPTS {
            self.swap_to_ratio().await?;
            if self.amm.in_range().await? {
                break;
            }
            debug!(attempt, "price left the new window while balancing");
            range = self.next_window(width).await?;
        }

        let loose = self.loose();
        let quote = self.amm.quote_deposit(loose).await?;
        let receipt = self
            .amm
            .deposit(self.address, loose, min_out(quote.liquidity, self.slippage_bps()))
            .await?;
        self.state = self.state.take().into_phase(EpochPhase::Open);
        if let Some(epoch) = self.state.epoch_mut() {
            epoch.liquidity = receipt.liquidity;
            epoch.range = Some(range);
            epoch.recenters += 1;
            info!(
                epoch = epoch.id,
                lower = range.lower,
                upper = range.upper,
                deposited = %receipt.used,
                liquidity = %receipt.liquidity,
                "position recentered"
            );
        }
        Ok(range)
    }

    async fn next_window(&self, width: i32) -> Result<TickRange, JointError> {
        self.amm
            .recenter_range(self.address, width)
            .await?
            .ok_or_else(|| StateViolation::Unsupported { action: "recenter" }.into())
    }

    /// Ends the epoch: unstakes, withdraws, closes the hedge, rebalances and hands each
    /// provider its asset. A no-op while idle.
    ///
    /// A rebalance that cannot be done is refused before anything is unwound, leaving the
    /// epoch open. An epoch left in [`EpochPhase::Closing`] by a failed settle resumes
    /// from there on the next call.
    pub async fn end_epoch(&mut self, caller: Address) -> Result<Option<Settlement>, JointError> {
        self.authorize(caller, &[Role::Keeper], "end the epoch")?;
        match self.state.phase() {
            EpochPhase::Idle => {
                debug!("no epoch to end");
                return Ok(None);
            }
            EpochPhase::Closing => {}
            EpochPhase::Open | EpochPhase::Recentering => {
                self.preflight_close().await?;
                self.unwind_position().await?;
                self.close_hedge().await?;
                self.state = self.state.take().into_phase(EpochPhase::Closing);
                if let Some(epoch) = self.state.epoch() {
                    info!(epoch = epoch.id, loose = %self.loose(), "epoch unwound");
                }
            }
        }
        self.settle().await.map(Some)
    }

    /// Checks the price sources and the rebalance before anything is unwound.
    async fn preflight_close(&self) -> Result<(), JointError> {
        let Some(epoch) = self.state.epoch() else {
            return Ok(());
        };
        let pool_price = self.amm.current_price().await?;
        if epoch.hedge.is_some() {
            cross_check(self.oracle.as_ref(), pool_price, self.config.max_oracle_deviation_bps).await?;
        }
        let estimate = self.estimated_total_assets().await?;
        if let Some((asset, amount)) = rebalance_sell(epoch.provided, estimate, pool_price) {
            self.rebalance_quote(asset, amount, pool_price).await?;
        }
        Ok(())
    }

    /// Quotes a rebalancing sale and rejects it when the pool cannot absorb it.
    async fn rebalance_quote(&self, asset: Asset, amount: U256, price: f64) -> Result<U256, JointError> {
        let fair = match asset {
            Asset::A => raw_to_f64(amount) * price,
            Asset::B => raw_to_f64(amount) / price,
        };
        if fair < DUST {
            return Ok(U256::ZERO);
        }
        let (token_in, token_out) = self.sides(asset);
        let quoted = match self.router.quote_exact_in(token_in, token_out, amount).await {
            Ok(quoted) => quoted,
            Err(err) => {
                warn!(%asset, %amount, %err, "no market for rebalance");
                return Err(JointError::InsufficientLiquidityToRebalance {
                    asset,
                    amount,
                    reason: err.to_string(),
                });
            }
        };
        let impact = deviation_bps(fair, raw_to_f64(quoted));
        let limit = self.config.slippage.max_rebalance_impact_bps;
        if impact > limit {
            warn!(%asset, %amount, %quoted, impact, limit, "rebalance would move the pool too far");
            return Err(JointError::InsufficientLiquidityToRebalance {
                asset,
                amount,
                reason: format!("price impact {impact} bps over {limit} bps"),
            });
        }
        Ok(quoted)
    }

    async fn rebalance(&self, provided: PairAmounts) -> Result<(), JointError> {
        let loose = self.loose();
        let price = self.amm.current_price().await?;
        let Some((asset, amount)) = rebalance_sell(provided, loose, price) else {
            return Ok(());
        };
        let quoted = self.rebalance_quote(asset, amount, price).await?;
        if quoted.is_zero() {
            debug!(%asset, %amount, "rebalance too small to swap");
            return Ok(());
        }
        let (token_in, token_out) = self.sides(asset);
        let out = self
            .router
            .swap_exact_in(self.address, token_in, token_out, amount, min_out(quoted, self.slippage_bps()))
            .await?;
        info!(sold = %amount, %asset, bought = %out, "rebalanced returns");
        Ok(())
    }

    /// Converts rewards, rebalances and returns everything from a closing epoch.
    async fn settle(&mut self) -> Result<Settlement, JointError> {
        let provided = match &self.state {
            EpochState::Closing(epoch) if !epoch.is_unwound() => {
                return Err(match epoch.hedge {
                    Some(id) => StateViolation::HedgeActive(id),
                    None => StateViolation::PositionNotEmpty(epoch.liquidity),
                }
                .into());
            }
            EpochState::Closing(epoch) => epoch.provided,
            other => {
                return Err(StateViolation::WrongPhase {
                    phase: other.phase(),
                    action: "settle",
                }
                .into())
            }
        };
        let converted = self
            .harvester
            .convert(self.address, self.config.harvest.reward_to_a_bps, self.slippage_bps())
            .await?;
        if let Some(epoch) = self.state.epoch_mut() {
            epoch.rewards_converted = epoch.rewards_converted.saturating_add(converted);
        }
        self.rebalance(provided).await?;
        self.finish()
    }

    /// Returns every loose unit to its provider and goes idle.
    pub(crate) fn finish(&mut self) -> Result<Settlement, JointError> {
        let epoch = match &self.state {
            EpochState::Closing(epoch) => epoch.clone(),
            other => {
                return Err(StateViolation::WrongPhase {
                    phase: other.phase(),
                    action: "settle",
                }
                .into())
            }
        };
        let returned = self.loose();
        self.token_a.transfer(self.address, self.provider_a, returned.a)?;
        self.token_b.transfer(self.address, self.provider_b, returned.b)?;
        self.state = EpochState::Idle;
        let settlement = Settlement {
            epoch_id: epoch.id,
            provided: epoch.provided,
            returned,
            hedge_cost: epoch.hedge_cost,
            hedge_payout: epoch.hedge_payout,
            rewards_converted: epoch.rewards_converted,
            ended_at: self.clock.now(),
        };
        let (return_a, return_b) = settlement.returns();
        info!(
            epoch = epoch.id,
            provided = %settlement.provided,
            returned = %returned,
            hedge_payout = %settlement.hedge_payout,
            return_a,
            return_b,
            "epoch settled"
        );
        self.settled_epochs += 1;
        self.force_end = false;
        self.last_settlement = Some(settlement);
        Ok(settlement)
    }

    /// Claims rewards and fees, converts rewards and puts everything loose back into
    /// the position. Gated by the harvest cooldown.
    pub async fn harvest(&mut self, caller: Address) -> Result<HarvestReport, JointError> {
        self.authorize(caller, &[Role::Keeper], "harvest")?;
        let phase = self.state.phase();
        if phase != EpochPhase::Open {
            return Err(StateViolation::WrongPhase { phase, action: "harvest" }.into());
        }
        let now = self.clock.now();
        let elapsed = now.saturating_sub(self.last_harvest);
        let cooldown = self.config.harvest.cooldown_secs;
        if elapsed < cooldown {
            return Err(StateViolation::Cooldown {
                remaining: cooldown - elapsed,
            }
            .into());
        }

        let (claimed, converted) = self
            .harvester
            .harvest(
                self.address,
                self.config.harvest.min_reward_to_harvest,
                self.config.harvest.reward_to_a_bps,
                self.slippage_bps(),
            )
            .await?;
        let fees = self.amm.collect(self.address).await?;
        let redeposited = self.redeposit().await?;
        if let Some(epoch) = self.state.epoch_mut() {
            epoch.rewards_converted = epoch.rewards_converted.saturating_add(converted);
        }
        self.last_harvest = now;
        let report = HarvestReport {
            claimed,
            fees,
            converted,
            redeposited,
        };
        info!(
            claimed = %claimed,
            fees = %fees,
            converted = %converted,
            redeposited = %redeposited,
            "joint harvested"
        );
        Ok(report)
    }

    async fn redeposit(&mut self) -> Result<PairAmounts, JointError> {
        let loose = self.loose();
        if loose.a.is_zero() || loose.b.is_zero() {
            return Ok(PairAmounts::ZERO);
        }
        let quote = self.amm.quote_deposit(loose).await?;
        if quote.liquidity.is_zero() {
            return Ok(PairAmounts::ZERO);
        }
        let receipt = self
            .amm
            .deposit(self.address, loose, min_out(quote.liquidity, self.slippage_bps()))
            .await?;
        let staked = if self.harvester.can_stake(self.amm.liquidity_token().as_ref()) {
            self.harvester.stake(self.address, receipt.liquidity).await?;
            receipt.liquidity
        } else {
            U256::ZERO
        };
        if let Some(epoch) = self.state.epoch_mut() {
            epoch.liquidity += receipt.liquidity;
            epoch.staked += staked;
            epoch.invested = epoch.invested.saturating_add(receipt.used);
        }
        Ok(receipt.used)
    }

    /// True when an open epoch is past its cooldown with more rewards waiting than
    /// the harvest minimum.
    pub async fn harvest_trigger(&self) -> Result<bool, JointError> {
        if self.state.phase() != EpochPhase::Open {
            return Ok(false);
        }
        let elapsed = self.clock.now().saturating_sub(self.last_harvest);
        if elapsed < self.config.harvest.cooldown_secs {
            return Ok(false);
        }
        let pending = self.harvester.pending(self.address).await?;
        Ok(pending > self.config.harvest.min_reward_to_harvest)
    }

    /// Unclaimed incentive rewards, valued as the A and B they would convert into.
    pub async fn pending_rewards(&self) -> Result<PairAmounts, JointError> {
        let pending = self.harvester.pending(self.address).await?;
        self.harvester
            .quote(pending, self.config.harvest.reward_to_a_bps)
            .await
    }

    /// Everything the epoch would return before rebalancing: loose balances, the
    /// position, uncollected fees, the hedge payout and pending rewards.
    pub async fn estimated_total_assets(&self) -> Result<PairAmounts, JointError> {
        let mut total = self.loose();
        let Some(epoch) = self.state.epoch() else {
            return Ok(total);
        };
        if !epoch.liquidity.is_zero() {
            total = total.saturating_add(self.amm.amounts_for_liquidity(epoch.liquidity).await?);
        }
        total = total.saturating_add(self.amm.position(self.address).await?.collectable);
        if let (Some(id), Some(hedge)) = (epoch.hedge, &self.hedge) {
            total = total.saturating_add(hedge.payout(id).await?);
        }
        Ok(total.saturating_add(self.pending_rewards().await?))
    }

    /// What each provider would receive if the epoch ended at the current price.
    pub async fn estimated_settlement(&self) -> Result<PairAmounts, JointError> {
        let total = self.estimated_total_assets().await?;
        let Some(epoch) = self.state.epoch() else {
            return Ok(total);
        };
        let price = self.amm.current_price().await?;
        Ok(match rebalance_sell(epoch.provided, total, price) {
            Some((Asset::A, sold)) => PairAmounts::new(
                total.a - sold,
                total.b.saturating_add(f64_to_u256(raw_to_f64(sold) * price)),
            ),
            Some((Asset::B, sold)) => PairAmounts::new(
                total.a.saturating_add(f64_to_u256(raw_to_f64(sold) / price)),
                total.b - sold,
            ),
            None => total,
        })
    }

    pub async fn snapshot(&self) -> Result<JointSnapshot, JointError> {
        let (dec_a, dec_b) = (self.token_a.decimals(), self.token_b.decimals());
        let human_a = |amount: U256| u256_to_f64(amount, dec_a as u32);
        let human_b = |amount: U256| u256_to_f64(amount, dec_b as u32);
        let b_value = |value: f64| value / 10f64.powi(dec_b as i32);

        let price = self.amm.current_price().await?;
        let epoch = self.state.epoch();
        let liquidity = epoch.map(|e| e.liquidity).unwrap_or_default();
        let in_position = self.amm.amounts_for_liquidity(liquidity).await?;
        let collectable = match epoch {
            Some(_) => self.amm.position(self.address).await?.collectable,
            None => PairAmounts::ZERO,
        };
        let loose = self.loose();
        let hedge_payout = match (epoch.and_then(|e| e.hedge), &self.hedge) {
            (Some(id), Some(hedge)) => hedge.payout(id).await?,
            _ => PairAmounts::ZERO,
        };
        let hedge_cost = epoch.map(|e| e.hedge_cost).unwrap_or_default();
        let rewards = self.pending_rewards().await?;
        let estimated = self.estimated_settlement().await?;
        let range = epoch.and_then(|e| e.range);

        Ok(JointSnapshot {
            timestamp: self.clock.now(),
            phase: self.state.phase(),
            epoch_id: epoch.map(|e| e.id),
            price: raw_to_human_price(price, dec_a, dec_b),
            position_a: human_a(in_position.a),
            position_b: human_b(in_position.b),
            collectable_a: human_a(collectable.a),
            collectable_b: human_b(collectable.b),
            loose_a: human_a(loose.a),
            loose_b: human_b(loose.b),
            staked_liquidity: epoch.map(|e| e.staked).unwrap_or_default().to_string(),
            hedge_payout_value: b_value(hedge_payout.value_in_b(price)),
            hedge_cost_value: b_value(hedge_cost.value_in_b(price)),
            pending_rewards_a: human_a(rewards.a),
            pending_rewards_b: human_b(rewards.b),
            estimated_a: human_a(estimated.a),
            estimated_b: human_b(estimated.b),
            estimated_value_b: b_value(estimated.value_in_b(price)),
            in_range: self.amm.in_range().await?,
            tick_lower: range.map(|r| r.lower),
            tick_upper: range.map(|r| r.upper),
        })
    }
}
