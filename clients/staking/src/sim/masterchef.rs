use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::Token;
use parking_lot::Mutex;
use tracing::{debug, warn};
use utils::Clock;

use crate::{StakingError, StakingVenue};

/// Fixed-point scale of `acc_reward_per_share`.
const ACC_PRECISION: u64 = 1_000_000_000_000;

#[derive(Debug, Default, Clone, Copy)]
struct UserInfo {
    amount: U256,
    reward_debt: U256,
}

#[derive(Debug, Default)]
struct Pool {
    acc_reward_per_share: U256,
    last_reward_time: u64,
    total_staked: U256,
    users: HashMap<Address, UserInfo>,
}

/// Single-pool MasterChef emitting `reward_per_sec` across all stakers.
///
/// Rewards are paid from the chef's own reward-token balance; when it runs dry the
/// payout is capped at what is left.
pub struct MasterChef {
    address: Address,
    stake_token: Token,
    reward_token: Token,
    reward_per_sec: U256,
    clock: Arc<dyn Clock>,
    pool: Mutex<Pool>,
}

impl MasterChef {
    pub fn new(
        address: Address,
        stake_token: Token,
        reward_token: Token,
        reward_per_sec: U256,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last_reward_time = clock.now();
        Self {
            address,
            stake_token,
            reward_token,
            reward_per_sec,
            clock,
            pool: Mutex::new(Pool {
                last_reward_time,
                ..Pool::default()
            }),
        }
    }

    fn accumulated(&self, pool: &Pool, now: u64) -> U256 {
        if now <= pool.last_reward_time || pool.total_staked.is_zero() {
            return pool.acc_reward_per_share;
        }
        let elapsed = U256::from(now - pool.last_reward_time);
        pool.acc_reward_per_share
            + self.reward_per_sec * elapsed * U256::from(ACC_PRECISION) / pool.total_staked
    }

    fn update(&self, pool: &mut Pool) {
        let now = self.clock.now();
        pool.acc_reward_per_share = self.accumulated(pool, now);
        pool.last_reward_time = pool.last_reward_time.max(now);
    }

    fn owed(user: &UserInfo, acc: U256) -> U256 {
        (user.amount * acc / U256::from(ACC_PRECISION)).saturating_sub(user.reward_debt)
    }

    /// Pays `amount` of reward, capped at the chef's balance.
    fn pay(&self, to: Address, amount: U256) -> Result<U256, StakingError> {
        let available = self.reward_token.balance_of(self.address);
        let paid = amount.min(available);
        if paid < amount {
            warn!(owed = %amount, %available, "staking rewards underfunded");
        }
        self.reward_token.transfer(self.address, to, paid)?;
        Ok(paid)
    }

    /// Settles pending rewards for `owner`, applies `change` to the stake and resets
    /// the reward debt.
    fn settle(
        &self,
        owner: Address,
        change: impl FnOnce(&mut Pool, &mut UserInfo) -> Result<(), StakingError>,
    ) -> Result<U256, StakingError> {
        let mut pool = self.pool.lock();
        self.update(&mut pool);
        let mut user = pool.users.get(&owner).copied().unwrap_or_default();
        let pending = Self::owed(&user, pool.acc_reward_per_share);
        change(&mut pool, &mut user)?;
        let paid = self.pay(owner, pending)?;
        user.reward_debt = user.amount * pool.acc_reward_per_share / U256::from(ACC_PRECISION);
        pool.users.insert(owner, user);
        Ok(paid)
    }
}

#[async_trait]
impl StakingVenue for MasterChef {
    fn address(&self) -> Address {
        self.address
    }

    fn stake_token(&self) -> Token {
        self.stake_token.clone()
    }

    fn reward_token(&self) -> Token {
        self.reward_token.clone()
    }

    async fn stake(&self, owner: Address, amount: U256) -> Result<U256, StakingError> {
        let paid = self.settle(owner, |pool, user| {
            self.stake_token.transfer(owner, self.address, amount)?;
            user.amount += amount;
            pool.total_staked += amount;
            Ok(())
        })?;
        debug!(%owner, %amount, rewards = %paid, "staked");
        Ok(paid)
    }

    async fn unstake(&self, owner: Address, amount: U256) -> Result<U256, StakingError> {
        let paid = self.settle(owner, |pool, user| {
            if user.amount < amount {
                return Err(StakingError::InsufficientStake {
                    staked: user.amount,
                    requested: amount,
                });
            }
            self.stake_token.transfer(self.address, owner, amount)?;
            user.amount -= amount;
            pool.total_staked -= amount;
            Ok(())
        })?;
        debug!(%owner, %amount, rewards = %paid, "unstaked");
        Ok(paid)
    }

    async fn claim(&self, owner: Address) -> Result<U256, StakingError> {
        self.settle(owner, |_, _| Ok(()))
    }

    async fn pending(&self, owner: Address) -> Result<U256, StakingError> {
        let pool = self.pool.lock();
        let acc = self.accumulated(&pool, self.clock.now());
        Ok(pool
            .users
            .get(&owner)
            .map(|user| Self::owed(user, acc))
            .unwrap_or_default())
    }

    async fn staked(&self, owner: Address) -> Result<U256, StakingError> {
        Ok(self
            .pool
            .lock()
            .users
            .get(&owner)
            .map(|user| user.amount)
            .unwrap_or_default())
    }
}
