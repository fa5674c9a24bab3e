use std::sync::Arc;

use alloy::primitives::{Address, U256};
use clients_amm::{AmmError, SwapRouter};
use clients_erc20::Token;
use clients_staking::StakingVenue;
use tracing::{debug, info};
use utils::{apply_bps, min_out, PairAmounts};

use crate::JointError;

/// Claims staking rewards for the joint and converts them into A and B.
pub struct RewardHarvester {
    staking: Option<Arc<dyn StakingVenue>>,
    router: Arc<SwapRouter>,
    token_a: Token,
    token_b: Token,
}

impl RewardHarvester {
    pub fn new(
        staking: Option<Arc<dyn StakingVenue>>,
        router: Arc<SwapRouter>,
        token_a: Token,
        token_b: Token,
    ) -> Self {
        Self {
            staking,
            router,
            token_a,
            token_b,
        }
    }

    pub fn staking(&self) -> Option<&Arc<dyn StakingVenue>> {
        self.staking.as_ref()
    }

    pub fn reward_token(&self) -> Option<Token> {
        self.staking.as_ref().map(|staking| staking.reward_token())
    }

    /// True when `liquidity_token` is what the staking venue accepts.
    pub fn can_stake(&self, liquidity_token: Option<&Token>) -> bool {
        match (&self.staking, liquidity_token) {
            (Some(staking), Some(token)) => staking.stake_token() == *token,
            _ => false,
        }
    }

    pub async fn stake(&self, owner: Address, amount: U256) -> Result<U256, JointError> {
        match &self.staking {
            Some(staking) if !amount.is_zero() => Ok(staking.stake(owner, amount).await?),
            _ => Ok(U256::ZERO),
        }
    }

    pub async fn unstake(&self, owner: Address, amount: U256) -> Result<U256, JointError> {
        match &self.staking {
            Some(staking) if !amount.is_zero() => Ok(staking.unstake(owner, amount).await?),
            _ => Ok(U256::ZERO),
        }
    }

    pub async fn claim(&self, owner: Address) -> Result<U256, JointError> {
        match &self.staking {
            Some(staking) => Ok(staking.claim(owner).await?),
            None => Ok(U256::ZERO),
        }
    }

    /// Reward tokens `owner` could convert now: unclaimed plus already held.
    pub async fn pending(&self, owner: Address) -> Result<U256, JointError> {
        let Some(staking) = &self.staking else {
            return Ok(U256::ZERO);
        };
        let unclaimed = staking.pending(owner).await?;
        Ok(unclaimed + staking.reward_token().balance_of(owner))
    }

    fn split(amount: U256, to_a_bps: u64) -> (U256, U256) {
        let to_a = apply_bps(amount, to_a_bps);
        (to_a, amount - to_a)
    }

    /// What converting `amount` reward tokens would buy, without swapping.
    pub async fn quote(&self, amount: U256, to_a_bps: u64) -> Result<PairAmounts, JointError> {
        let Some(reward) = self.reward_token() else {
            return Ok(PairAmounts::ZERO);
        };
        if amount.is_zero() {
            return Ok(PairAmounts::ZERO);
        }
        let (to_a, to_b) = Self::split(amount, to_a_bps);
        let a = self.quote_leg(&reward, &self.token_a, to_a).await?;
        let b = self.quote_leg(&reward, &self.token_b, to_b).await?;
        Ok(PairAmounts::new(a, b))
    }

    async fn quote_leg(&self, reward: &Token, target: &Token, amount: U256) -> Result<U256, AmmError> {
        if reward == target || amount.is_zero() {
            return Ok(amount);
        }
        let direct = self.router.venue_for(reward.address(), target.address());
        if direct.is_ok() {
            return self
                .router
                .quote_exact_in(reward.address(), target.address(), amount)
                .await;
        }
        // through A when there is no direct market for B
        let via_a = self
            .router
            .quote_exact_in(reward.address(), self.token_a.address(), amount)
            .await?;
        self.router
            .quote_exact_in(self.token_a.address(), target.address(), via_a)
            .await
    }

    async fn swap_leg(
        &self,
        owner: Address,
        reward: &Token,
        target: &Token,
        amount: U256,
        slippage_bps: u64,
    ) -> Result<U256, AmmError> {
        if reward == target || amount.is_zero() {
            return Ok(amount);
        }
        let router = &self.router;
        if router.venue_for(reward.address(), target.address()).is_ok() {
            let quoted = router
                .quote_exact_in(reward.address(), target.address(), amount)
                .await?;
            return router
                .swap_exact_in(
                    owner,
                    reward.address(),
                    target.address(),
                    amount,
                    min_out(quoted, slippage_bps),
                )
                .await;
        }
        let a = self.token_a.address();
        let quoted = router.quote_exact_in(reward.address(), a, amount).await?;
        let via_a = router
            .swap_exact_in(owner, reward.address(), a, amount, min_out(quoted, slippage_bps))
            .await?;
        let quoted = router.quote_exact_in(a, target.address(), via_a).await?;
        router
            .swap_exact_in(owner, a, target.address(), via_a, min_out(quoted, slippage_bps))
            .await
    }

    /// Sells every reward token `owner` holds, `to_a_bps` of it into A and the rest
    /// into B.
    pub async fn convert(
        &self,
        owner: Address,
        to_a_bps: u64,
        slippage_bps: u64,
    ) -> Result<PairAmounts, JointError> {
        let Some(reward) = self.reward_token() else {
            return Ok(PairAmounts::ZERO);
        };
        let balance = reward.balance_of(owner);
        if balance.is_zero() {
            return Ok(PairAmounts::ZERO);
        }
        let (to_a, to_b) = Self::split(balance, to_a_bps);
        let a = self
            .swap_leg(owner, &reward, &self.token_a, to_a, slippage_bps)
            .await?;
        let b = self
            .swap_leg(owner, &reward, &self.token_b, to_b, slippage_bps)
            .await?;
        let converted = PairAmounts::new(a, b);
        info!(reward = reward.symbol(), sold = %balance, converted = %converted, "converted rewards");
        Ok(converted)
    }

    /// Claims, then converts once the held rewards exceed `min_reward`.
    ///
    /// # Returns
    /// `(claimed, converted)`
    pub async fn harvest(
        &self,
        owner: Address,
        min_reward: U256,
        to_a_bps: u64,
        slippage_bps: u64,
    ) -> Result<(U256, PairAmounts), JointError> {
        let Some(reward) = self.reward_token() else {
            return Ok((U256::ZERO, PairAmounts::ZERO));
        };
        let claimed = self.claim(owner).await?;
        let held = reward.balance_of(owner);
        if held.is_zero() || held <= min_reward {
            debug!(%held, %min_reward, "rewards below harvest minimum");
            return Ok((claimed, PairAmounts::ZERO));
        }
        let converted = self.convert(owner, to_a_bps, slippage_bps).await?;
        Ok((claimed, converted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clients_amm::sim::ConstantProductPair;
    use clients_amm::ConstantProductVenue;
    use clients_staking::sim::MasterChef;
    use utils::ManualClock;

    struct Fixture {
        harvester: RewardHarvester,
        a: Token,
        b: Token,
        reward: Token,
        clock: Arc<ManualClock>,
        owner: Address,
    }

    async fn fixture() -> Fixture {
        let a = Token::new(Address::with_last_byte(1), "WFTM", 18);
        let b = Token::new(Address::with_last_byte(2), "USDC", 18);
        let reward = Token::new(Address::with_last_byte(3), "BOO", 18);
        let lp = Address::with_last_byte(0x60);
        for token in [&a, &b, &reward] {
            token.mint(lp, token.units(1_000_000)).unwrap();
        }
        let pair = Arc::new(ConstantProductPair::new(Address::with_last_byte(0x50), a.clone(), b.clone(), 30));
        let reward_pair =
            Arc::new(ConstantProductPair::new(Address::with_last_byte(0x52), reward.clone(), a.clone(), 30));
        pair.add_liquidity(lp, (a.units(100_000), b.units(100_000)), (U256::ZERO, U256::ZERO))
            .await
            .unwrap();
        reward_pair
            .add_liquidity(lp, (reward.units(100_000), a.units(100_000)), (U256::ZERO, U256::ZERO))
            .await
            .unwrap();

        let clock = Arc::new(ManualClock::new(1_000));
        let owner = Address::with_last_byte(0xc0);
        let stake_token = pair.lp_token();
        let chef = Arc::new(MasterChef::new(
            Address::with_last_byte(0x80),
            stake_token.clone(),
            reward.clone(),
            reward.units(1),
            clock.clone(),
        ));
        reward.mint(chef.address(), reward.units(100_000)).unwrap();
        stake_token.mint(owner, stake_token.units(10)).unwrap();

        let router = Arc::new(SwapRouter::new(pair).with_venue(reward_pair));
        let harvester = RewardHarvester::new(Some(chef), router, a.clone(), b.clone());
        assert!(harvester.can_stake(Some(&stake_token)));
        harvester.stake(owner, stake_token.units(10)).await.unwrap();
        Fixture {
            harvester,
            a,
            b,
            reward,
            clock,
            owner,
        }
    }

    #[tokio::test]
    async fn converts_through_a_when_b_has_no_market() {
        let f = fixture().await;
        f.clock.advance(100);
        assert_eq!(f.harvester.pending(f.owner).await.unwrap(), f.reward.units(100));
        let quoted = f.harvester.quote(f.reward.units(100), 5_000).await.unwrap();

        let (claimed, converted) = f
            .harvester
            .harvest(f.owner, U256::ZERO, 5_000, 100)
            .await
            .unwrap();
        assert_eq!(claimed, f.reward.units(100));
        // the A leg moves the reward market before the B leg routes through it
        assert_eq!(converted.a, quoted.a);
        assert!(converted.b < quoted.b && converted.b > quoted.b * U256::from(99u64) / U256::from(100u64));
        assert_eq!(f.a.balance_of(f.owner), converted.a);
        assert_eq!(f.b.balance_of(f.owner), converted.b);
        assert!(converted.a > f.a.units(49) && converted.b > f.b.units(48));
        assert!(f.reward.balance_of(f.owner).is_zero());
    }

    #[tokio::test]
    async fn holds_rewards_below_minimum() {
        let f = fixture().await;
        f.clock.advance(10);
        let (claimed, converted) = f
            .harvester
            .harvest(f.owner, f.reward.units(50), 5_000, 100)
            .await
            .unwrap();
        assert_eq!(claimed, f.reward.units(10));
        assert!(converted.is_zero());
        assert_eq!(f.reward.balance_of(f.owner), f.reward.units(10));
    }
}
