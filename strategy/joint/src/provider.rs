//! Per-asset bridge between a vault and the joint.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use clients_erc20::Token;
use clients_vault::Vault;
use tracing::{debug, info, warn};
use utils::{apply_bps, PairAmounts};

use crate::config::ProviderConfig;
use crate::{AdminCommand, Asset, ConfigError, EpochPhase, Joint, JointError, ProviderReport, StateViolation};

/// Vault strategy that lends one asset of the pair to the joint.
///
/// Only the provider's own harvest reports to the vault; the joint never touches vault
/// accounting.
pub struct ProviderAdapter {
    address: Address,
    asset: Asset,
    want: Token,
    vault: Arc<dyn Vault>,
    config: ProviderConfig,
    governance: Address,
    keeper: Address,
    /// Joint epochs settled as of this provider's last report
    reported_epochs: u64,
}

impl std::fmt::Debug for ProviderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAdapter")
            .field("address", &self.address)
            .field("asset", &self.asset)
            .field("want", &self.want)
            .field("config", &self.config)
            .field("governance", &self.governance)
            .field("keeper", &self.keeper)
            .field("reported_epochs", &self.reported_epochs)
            .finish_non_exhaustive()
    }
}

impl ProviderAdapter {
    pub fn new(
        address: Address,
        asset: Asset,
        vault: Arc<dyn Vault>,
        config: ProviderConfig,
        joint: &Joint,
    ) -> Result<Self, JointError> {
        config.validate()?;
        let want = vault.token();
        if want != *joint.token(asset) {
            return Err(ConfigError::InvalidValue {
                field: "vault",
                reason: format!(
                    "vault lends {} but side {asset} of the joint is {}",
                    want.symbol(),
                    joint.token(asset).symbol()
                ),
            }
            .into());
        }
        if joint.provider(asset) != address {
            return Err(ConfigError::InvalidValue {
                field: "address",
                reason: format!("joint expects provider {} for side {asset}", joint.provider(asset)),
            }
            .into());
        }
        Ok(Self {
            address,
            asset,
            want,
            vault,
            config,
            governance: joint.config().governance,
            keeper: joint.config().keeper,
            reported_epochs: joint.settled_epochs(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn asset(&self) -> Asset {
        self.asset
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Want held by the provider itself.
    pub fn want_balance(&self) -> U256 {
        self.want.balance_of(self.address)
    }

    fn authorize(&self, caller: Address, action: &'static str) -> Result<(), StateViolation> {
        if caller == self.governance || caller == self.keeper {
            Ok(())
        } else {
            Err(StateViolation::Unauthorized { caller, action })
        }
    }

    /// Changes the provider's flags; governance only.
    pub fn configure(
        &mut self,
        caller: Address,
        update: impl FnOnce(&mut ProviderConfig),
    ) -> Result<(), JointError> {
        if caller != self.governance {
            return Err(StateViolation::Unauthorized {
                caller,
                action: "configure the provider",
            }
            .into());
        }
        let mut next = self.config.clone();
        update(&mut next);
        next.validate()?;
        self.config = next;
        Ok(())
    }

    fn require_joint_provider(&self, joint: &Joint) -> Result<(), StateViolation> {
        if joint.provider(self.asset) == self.address {
            Ok(())
        } else {
            Err(StateViolation::NotProvider(self.address))
        }
    }

    /// Want plus this side's share of what the joint would return now.
    pub async fn estimated_total_assets(&self, joint: &Joint) -> Result<U256, JointError> {
        if self.require_joint_provider(joint).is_err() {
            return Ok(self.want_balance());
        }
        let share = match joint.phase() {
            EpochPhase::Idle => self.asset.of(joint.pending()),
            _ => self.asset.of(joint.estimated_settlement().await?),
        };
        Ok(self.want_balance() + share)
    }

    /// True when this provider should be harvested: it was asked to, the joint's epoch
    /// should end, or an epoch it funded has closed without being reported.
    pub async fn harvest_trigger(&self, joint: &Joint, _call_cost: U256) -> Result<bool, JointError> {
        if self.config.launch_harvest {
            return Ok(true);
        }
        if joint.settled_epochs() > self.reported_epochs {
            return Ok(true);
        }
        joint.should_end_epoch().await
    }

    /// `(gain, loss)` of `total` against `debt`.
    fn pnl(total: U256, debt: U256) -> (U256, U256) {
        if total >= debt {
            (total - debt, U256::ZERO)
        } else {
            (U256::ZERO, debt - total)
        }
    }

    fn check_health(&self, gain: U256, loss: U256, debt: U256) -> Result<(), JointError> {
        if !self.config.do_health_check {
            return Ok(());
        }
        let max_gain = apply_bps(debt, self.config.profit_limit_bps);
        let max_loss = apply_bps(debt, self.config.loss_limit_bps);
        if gain > max_gain || loss > max_loss {
            warn!(asset = %self.asset, %gain, %loss, %debt, "health check failed");
            return Err(JointError::HealthCheckViolation { gain, loss, debt });
        }
        Ok(())
    }

    /// Closes the joint's epoch when due, reports gain or loss to the vault, then
    /// forwards the new want and opens the next epoch once both sides are in.
    ///
    /// Everything that can refuse the harvest runs before the first balance moves: the
    /// health check on the projected outcome, and whether the next epoch could open. A
    /// next epoch that cannot open yet is not an error; the want waits in the joint.
    pub async fn harvest(&mut self, caller: Address, joint: &mut Joint) -> Result<ProviderReport, JointError> {
        self.authorize(caller, "harvest")?;
        self.require_joint_provider(joint)?;
        let debt = self.vault.debt(self.address).await?;

        let closing = joint.phase() != EpochPhase::Idle
            && (self.config.take_profit || joint.should_end_epoch().await?);
        let realising = closing || joint.phase() == EpochPhase::Idle;
        if realising {
            let projected = self.estimated_total_assets(joint).await?;
            let (gain, loss) = Self::pnl(projected, debt);
            self.check_health(gain, loss, debt)?;
        }
        let open_next = if !closing && self.config.invest_want && joint.phase() == EpochPhase::Idle {
            self.can_open_next(joint).await?
        } else {
            false
        };

        let settlement = if closing {
            joint.end_epoch(caller).await?
        } else {
            None
        };
        if joint.phase() == EpochPhase::Idle && !self.asset.of(joint.pending()).is_zero() {
            joint.withdraw_pending(self.address).await?;
        }

        let want = self.want_balance();
        let (gain, loss) = if joint.phase() == EpochPhase::Idle {
            Self::pnl(want, debt)
        } else {
            // capital is still in the joint; nothing is realised yet
            (U256::ZERO, U256::ZERO)
        };
        if self.check_health(gain, loss, debt).is_err() {
            // the projection passed and the epoch is already settled
            warn!(asset = %self.asset, %gain, %loss, "settled outside the health limits");
        }
        let outstanding = self.vault.debt_outstanding(self.address).await?;
        let debt_payment = outstanding.min(want.saturating_sub(gain));
        self.config.do_health_check = true;

        let debt_outstanding = self
            .vault
            .report(self.address, gain, loss, debt_payment)
            .await?;
        debug!(asset = %self.asset, %gain, %loss, %debt_payment, %debt_outstanding, "reported to vault");

        let mut invested = None;
        if self.config.invest_want && joint.phase() == EpochPhase::Idle {
            let want = self.want_balance();
            if !want.is_zero() {
                joint.forward(self.address, want).await?;
            }
            if open_next && joint.ready_to_invest() {
                match joint.invest(caller).await {
                    Ok(id) => invested = Some(id),
                    Err(err) => warn!(%err, "next epoch not opened, capital stays pending"),
                }
            }
        }

        self.config.launch_harvest = false;
        self.config.take_profit = false;
        self.reported_epochs = joint.settled_epochs();
        info!(
            provider = %self.address,
            asset = %self.asset,
            %gain,
            %loss,
            %debt_payment,
            epoch_closed = settlement.map(|s| s.epoch_id),
            epoch_opened = invested,
            "provider harvested"
        );
        Ok(ProviderReport {
            provider: self.address,
            asset: self.asset,
            gain,
            loss,
            debt_payment,
            debt_outstanding,
            settlement,
            invested,
        })
    }

    /// Whether forwarding this side's capital would let the next epoch open now.
    ///
    /// False without logging while the other side has not forwarded yet; false with a
    /// warning when invest would refuse, for example over the hedge budget.
    async fn can_open_next(&self, joint: &Joint) -> Result<bool, JointError> {
        let credit = self.vault.credit_available(self.address).await?;
        let outstanding = self.vault.debt_outstanding(self.address).await?;
        let ours = (self.asset.of(joint.pending()) + self.want_balance() + credit).saturating_sub(outstanding);
        let projected = match self.asset {
            Asset::A => PairAmounts::new(ours, joint.pending().b),
            Asset::B => PairAmounts::new(joint.pending().a, ours),
        };
        if projected.a.is_zero() || projected.b.is_zero() {
            return Ok(false);
        }
        match joint.preview_invest(projected).await {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(asset = %self.asset, %err, "next epoch cannot open yet");
                Ok(false)
            }
        }
    }

    /// Pulls forwarded capital back from an idle joint.
    pub async fn withdraw_from_joint(&self, caller: Address, joint: &mut Joint) -> Result<U256, JointError> {
        self.authorize(caller, "withdraw from the joint")?;
        joint.withdraw_pending(self.address).await
    }

    /// Hands this side to a new provider at `new_address`, for example a new version
    /// of the strategy; governance only.
    ///
    /// The vault moves this provider's debt to the new one, the want follows, and the
    /// joint is pointed at the new provider. An open epoch carries on and settles to the
    /// new provider. This adapter can no longer harvest afterwards.
    ///
    /// # Returns
    /// The adapter for the new provider, with this one's flags
    pub async fn migrate(
        &self,
        caller: Address,
        new_address: Address,
        joint: &mut Joint,
    ) -> Result<ProviderAdapter, JointError> {
        if caller != self.governance {
            return Err(StateViolation::Unauthorized {
                caller,
                action: "migrate the provider",
            }
            .into());
        }
        self.require_joint_provider(joint)?;
        joint.check_provider(self.asset, new_address)?;

        self.vault.migrate_strategy(self.address, new_address).await?;
        let moved = self.want.sweep(self.address, new_address)?;
        joint.administer(
            caller,
            AdminCommand::SetProvider {
                asset: self.asset,
                address: new_address,
            },
        )?;
        info!(from = %self.address, to = %new_address, asset = %self.asset, %moved, "provider migrated");

        Ok(ProviderAdapter {
            address: new_address,
            asset: self.asset,
            want: self.want.clone(),
            vault: self.vault.clone(),
            config: self.config.clone(),
            governance: self.governance,
            keeper: self.keeper,
            reported_epochs: self.reported_epochs,
        })
    }

    /// Sends this provider's whole balance of a stray `token` to governance. Refuses
    /// the want and the vault's shares; governance only.
    ///
    /// # Returns
    /// The amount swept
    pub fn sweep(&self, caller: Address, token: &Token) -> Result<U256, JointError> {
        if caller != self.governance {
            return Err(StateViolation::Unauthorized {
                caller,
                action: "sweep",
            }
            .into());
        }
        if *token == self.want {
            return Err(StateViolation::ProtectedToken {
                token: token.address(),
                reason: "want",
            }
            .into());
        }
        if token.address() == self.vault.address() {
            return Err(StateViolation::ProtectedToken {
                token: token.address(),
                reason: "vault shares",
            }
            .into());
        }
        let amount = token.sweep(self.address, self.governance)?;
        info!(token = token.symbol(), %amount, "swept to governance");
        Ok(amount)
    }
}
