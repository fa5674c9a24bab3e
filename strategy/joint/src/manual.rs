//! Governance entrypoints: manual escape hatches and runtime parameter changes.

use alloy::primitives::{Address, U256};
use clients_amm::{AmmError, SwapRoute};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utils::{min_out, PairAmounts};

use crate::config::HedgeBudgetPolicy;
use crate::{Asset, ConfigError, EpochPhase, Joint, JointConfig, JointError, Role, StateViolation};

/// Manual operations on the position. Each is legal only in the phases listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ManualCommand {
    /// Burns `liquidity` units (all of them when `None`); any non-idle phase.
    BurnLiquidity {
        liquidity: Option<U256>,
        min_out: PairAmounts,
    },
    /// Collects swap fees and burned principal; any non-idle phase.
    CollectFees,
    /// Unstakes and withdraws everything, leaving the epoch closing; any non-idle phase.
    RemoveLiquidity { min_out: PairAmounts },
    /// Sells loose `amount` of `sell`; any non-idle phase.
    Swap {
        sell: Asset,
        amount: U256,
        min_out: U256,
    },
    /// Closes the active hedge into the joint; any non-idle phase.
    CloseHedge,
    /// Hands loose balances to the providers. While idle this returns forwarded
    /// capital; while closing it requires an unwound epoch and finishes it.
    ReturnLooseToProviders,
}

/// Runtime parameter changes, validated like a freshly loaded config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "setting", content = "value", rename_all = "snake_case")]
pub enum AdminCommand {
    SetHedgeEnabled(bool),
    SetHedgeBudget(u64),
    SetHedgeBudgetPolicy(HedgeBudgetPolicy),
    /// Also applies to the open epoch
    SetPeriod(u64),
    SetProtectionRange(u64),
    /// Also applies to the open epoch
    SetMinTimeToMaturity(u64),
    SetMinRewardToHarvest(U256),
    SetRewardSplit(u64),
    SetSwapRoute(SwapRoute),
    SetRecenterWidth(i32),
    SetMaxSlippage(u64),
    SetForceEnd(bool),
    /// Points one side at a new provider; also applies to the open epoch
    SetProvider { asset: Asset, address: Address },
}

impl AdminCommand {
    fn apply(self, config: &mut JointConfig) {
        match self {
            AdminCommand::SetHedgeEnabled(enabled) => config.hedge.enabled = enabled,
            AdminCommand::SetHedgeBudget(bps) => config.hedge.budget_bps = bps,
            AdminCommand::SetHedgeBudgetPolicy(policy) => config.hedge.budget_policy = policy,
            AdminCommand::SetPeriod(secs) => config.period_secs = secs,
            AdminCommand::SetProtectionRange(bps) => config.hedge.protection_range_bps = bps,
            AdminCommand::SetMinTimeToMaturity(secs) => config.min_time_to_maturity_secs = secs,
            AdminCommand::SetMinRewardToHarvest(amount) => config.harvest.min_reward_to_harvest = amount,
            AdminCommand::SetRewardSplit(bps) => config.harvest.reward_to_a_bps = bps,
            AdminCommand::SetSwapRoute(route) => config.swap_route = route,
            AdminCommand::SetRecenterWidth(ticks) => config.recenter.ticks_from_current = ticks,
            AdminCommand::SetMaxSlippage(bps) => config.slippage.max_slippage_bps = bps,
            AdminCommand::SetForceEnd(_) | AdminCommand::SetProvider { .. } => {}
        }
    }
}

impl Joint {
    fn require_epoch(&self, action: &'static str) -> Result<(), StateViolation> {
        match self.state.phase() {
            EpochPhase::Idle => Err(StateViolation::WrongPhase {
                phase: EpochPhase::Idle,
                action,
            }),
            _ => Ok(()),
        }
    }

    /// Runs a manual operation.
    ///
    /// # Returns
    /// Amounts the operation moved into the joint, or out of it for
    /// [`ManualCommand::ReturnLooseToProviders`]
    pub async fn execute(&mut self, caller: Address, command: ManualCommand) -> Result<PairAmounts, JointError> {
        self.authorize(caller, &[Role::Governance], "run manual commands")?;
        info!(?command, phase = %self.state.phase(), "manual command");
        match command {
            ManualCommand::BurnLiquidity { liquidity, min_out } => self.burn_liquidity(liquidity, min_out).await,
            ManualCommand::CollectFees => {
                self.require_epoch("collect fees")?;
                Ok(self.amm.collect(self.address).await?)
            }
            ManualCommand::RemoveLiquidity { min_out } => {
                self.require_epoch("remove liquidity")?;
                let held = self.state.epoch().map(|e| e.liquidity).unwrap_or_default();
                let mut out = PairAmounts::ZERO;
                if !held.is_zero() {
                    out = self.burn_liquidity(Some(held), min_out).await?;
                }
                out = out.saturating_add(self.amm.collect(self.address).await?);
                self.state = self.state.take().into_phase(EpochPhase::Closing);
                Ok(out)
            }
            ManualCommand::Swap { sell, amount, min_out } => {
                self.require_epoch("swap")?;
                let (token_in, token_out) = match sell {
                    Asset::A => (self.token_a.address(), self.token_b.address()),
                    Asset::B => (self.token_b.address(), self.token_a.address()),
                };
                let out = self
                    .router
                    .swap_exact_in(self.address, token_in, token_out, amount, min_out)
                    .await?;
                Ok(match sell {
                    Asset::A => PairAmounts::new(U256::ZERO, out),
                    Asset::B => PairAmounts::new(out, U256::ZERO),
                })
            }
            ManualCommand::CloseHedge => {
                self.require_epoch("close the hedge")?;
                self.close_hedge().await
            }
            ManualCommand::ReturnLooseToProviders => self.return_loose().await,
        }
    }

    async fn burn_liquidity(
        &mut self,
        liquidity: Option<U256>,
        bound: PairAmounts,
    ) -> Result<PairAmounts, JointError> {
        self.require_epoch("burn liquidity")?;
        let (held, staked) = self
            .state
            .epoch()
            .map(|e| (e.liquidity, e.staked))
            .unwrap_or_default();
        let amount = liquidity.unwrap_or(held);
        if amount.is_zero() {
            return Ok(PairAmounts::ZERO);
        }
        if amount > held {
            return Err(AmmError::InsufficientLiquidity.into());
        }
        // staked units have to come back before they can be burned
        let unstaked_units = held - staked;
        if amount > unstaked_units {
            let needed = amount - unstaked_units;
            self.harvester.unstake(self.address, needed).await?;
            if let Some(epoch) = self.state.epoch_mut() {
                epoch.staked -= needed;
            }
        }
        let out = self.amm.burn(self.address, amount, bound).await?;
        if let Some(epoch) = self.state.epoch_mut() {
            epoch.liquidity -= amount;
        }
        Ok(out)
    }

    async fn return_loose(&mut self) -> Result<PairAmounts, JointError> {
        match self.state.phase() {
            EpochPhase::Idle => {
                let pending = self.pending;
                self.token_a.transfer(self.address, self.provider_a, pending.a)?;
                self.token_b.transfer(self.address, self.provider_b, pending.b)?;
                self.pending = PairAmounts::ZERO;
                Ok(pending)
            }
            EpochPhase::Closing => self.finish_manually(),
            EpochPhase::Open | EpochPhase::Recentering => {
                let loose = self.loose();
                self.token_a.transfer(self.address, self.provider_a, loose.a)?;
                self.token_b.transfer(self.address, self.provider_b, loose.b)?;
                if let Some(epoch) = self.state.epoch_mut() {
                    epoch.provided = epoch.provided.saturating_sub(loose);
                }
                warn!(returned = %loose, "loose balances returned mid-epoch");
                Ok(loose)
            }
        }
    }

    /// Finishes a closing epoch without rebalancing.
    fn finish_manually(&mut self) -> Result<PairAmounts, JointError> {
        if let Some(epoch) = self.state.epoch() {
            if let Some(id) = epoch.hedge {
                return Err(StateViolation::HedgeActive(id).into());
            }
            if !epoch.liquidity.is_zero() {
                return Err(StateViolation::PositionNotEmpty(epoch.liquidity).into());
            }
        }
        Ok(self.finish()?.returned)
    }

    /// Applies a parameter change after validating the resulting configuration.
    pub fn administer(&mut self, caller: Address, command: AdminCommand) -> Result<(), JointError> {
        self.authorize(caller, &[Role::Governance], "change parameters")?;
        let mut next = self.config.clone();
        command.apply(&mut next);
        next.validate()?;
        if let AdminCommand::SetProvider { asset, address } = command {
            self.check_provider(asset, address)?;
        }
        if let AdminCommand::SetSwapRoute(route) = command {
            self.router.set_route(route)?;
        }
        if let AdminCommand::SetForceEnd(force) = command {
            self.force_end = force;
        }
        if let AdminCommand::SetProvider { asset, address } = command {
            match asset {
                Asset::A => self.provider_a = address,
                Asset::B => self.provider_b = address,
            }
        }
        if let Some(epoch) = self.state.epoch_mut() {
            match command {
                AdminCommand::SetPeriod(secs) => epoch.period_secs = secs,
                AdminCommand::SetMinTimeToMaturity(secs) => epoch.min_time_to_maturity_secs = secs,
                _ => {}
            }
        }
        self.config = next;
        info!(?command, "parameters changed");
        Ok(())
    }

    /// Rejects `address` as the provider of `asset` when it is empty, the joint itself
    /// or the other side's provider.
    pub(crate) fn check_provider(&self, asset: Asset, address: Address) -> Result<(), ConfigError> {
        let reason = if address.is_zero() {
            "zero address"
        } else if address == self.address {
            "the joint itself"
        } else if address == self.provider(asset.other()) {
            "already provides the other side"
        } else {
            return Ok(());
        };
        Err(ConfigError::InvalidValue {
            field: "provider",
            reason: format!("{address} for side {asset}: {reason}"),
        })
    }

    /// Bounds for withdrawing `liquidity` units at the current price under the
    /// configured slippage.
    pub async fn withdraw_bounds(&self, liquidity: U256) -> Result<PairAmounts, JointError> {
        let expected = self.amm.amounts_for_liquidity(liquidity).await?;
        let slippage = self.config.slippage.max_slippage_bps;
        Ok(PairAmounts::new(
            min_out(expected.a, slippage),
            min_out(expected.b, slippage),
        ))
    }
}
