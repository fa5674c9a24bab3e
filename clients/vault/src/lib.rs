//! Yield vaults lending one asset to strategies against a debt ratio.

pub mod sim;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::{Token, TokenError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("{0} is not a strategy of this vault")]
    UnknownStrategy(Address),

    #[error("{0} is already a strategy of this vault")]
    DuplicateStrategy(Address),

    #[error("reported loss {loss} exceeds strategy debt {debt}")]
    LossExceedsDebt { loss: U256, debt: U256 },

    #[error("debt ratios would sum to {total} bps")]
    DebtRatioOverflow { total: u64 },

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Vault bookkeeping for one strategy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StrategyParams {
    /// Target share of vault assets, in bps
    pub debt_ratio: u64,
    pub max_debt_per_harvest: U256,
    pub last_report: u64,
    pub total_debt: U256,
    pub total_gain: U256,
    pub total_loss: U256,
}

#[async_trait]
pub trait Vault: Send + Sync {
    fn address(&self) -> Address;

    fn token(&self) -> Token;

    /// Books `gain` and `loss`, takes back up to `debt_payment`, then moves the
    /// difference between what the strategy owes and the credit it gets.
    ///
    /// The strategy must hold `gain + debt_payment` of the vault token.
    ///
    /// # Returns
    /// Debt the strategy still owes after the report
    async fn report(
        &self,
        strategy: Address,
        gain: U256,
        loss: U256,
        debt_payment: U256,
    ) -> Result<U256, VaultError>;

    async fn update_debt_ratio(&self, strategy: Address, debt_ratio: u64) -> Result<(), VaultError>;

    /// Hands `old`'s debt ratio and debt to `new`, which must not be a strategy yet.
    /// `old` stays on the books with nothing lent; moving the funds is up to `old`.
    async fn migrate_strategy(&self, old: Address, new: Address) -> Result<(), VaultError>;

    async fn debt(&self, strategy: Address) -> Result<U256, VaultError>;

    /// Amount over the strategy's debt limit, all of it when the ratio is zero.
    async fn debt_outstanding(&self, strategy: Address) -> Result<U256, VaultError>;

    /// Amount the strategy may borrow at its next report.
    async fn credit_available(&self, strategy: Address) -> Result<U256, VaultError>;

    async fn strategy_params(&self, strategy: Address) -> Result<StrategyParams, VaultError>;
}
