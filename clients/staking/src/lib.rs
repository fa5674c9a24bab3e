//! Incentive programs that pay rewards on staked liquidity tokens.

pub mod sim;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::{Token, TokenError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StakingError {
    #[error("cannot unstake {requested}: only {staked} staked")]
    InsufficientStake { staked: U256, requested: U256 },

    #[error("{0} is not the staking token")]
    WrongToken(Address),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// MasterChef-style staking pool for one liquidity token.
///
/// Every call that changes a stake settles the owner's pending rewards first, so the
/// amount returned by `stake`, `unstake` and `claim` is what was paid out.
#[async_trait]
pub trait StakingVenue: Send + Sync {
    fn address(&self) -> Address;

    fn stake_token(&self) -> Token;

    fn reward_token(&self) -> Token;

    /// Stakes `amount` from `owner`.
    ///
    /// # Returns
    /// Rewards paid out while settling
    async fn stake(&self, owner: Address, amount: U256) -> Result<U256, StakingError>;

    /// Returns `amount` of stake to `owner` and pays pending rewards.
    async fn unstake(&self, owner: Address, amount: U256) -> Result<U256, StakingError>;

    async fn claim(&self, owner: Address) -> Result<U256, StakingError>;

    async fn pending(&self, owner: Address) -> Result<U256, StakingError>;

    async fn staked(&self, owner: Address) -> Result<U256, StakingError>;
}
