//! In-memory world wiring a joint, its two providers and simulated venues together.
//!
//! Enabled for this crate's tests and, through the `testkit` feature, for demos.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use clients_amm::sim::{ConcentratedPool, ConstantProductPair, StablePool};
use clients_amm::{
    AmmAdapter, AmmKind, ConcentratedAdapter, ConcentratedVenue, ConstantProductAdapter,
    ConstantProductVenue, SwapRouter, SwapVenue, TickRange,
};
use clients_erc20::Token;
use clients_hedge::sim::{SimHedgil, SimOptions};
use clients_hedge::{DualOptionProvider, HedgeProvider, HedgilProvider, OptionKind};
use clients_oracle::RelayOracle;
use clients_staking::sim::MasterChef;
use clients_staking::StakingVenue;
use clients_vault::sim::SimVault;
use serde::Deserialize;
use utils::tick::{price_at_tick, window_around};
use utils::{f64_to_u256, human_to_raw_price, raw_to_f64, raw_to_human_price, Clock, ManualClock, BPS};

use crate::{
    Joint, JointConfig, JointError, JointParts, ProviderAdapter, ProviderConfig, ProviderReport,
    StateViolation,
};

pub const START_TIME: u64 = 1_700_000_000;
pub const DAY: u64 = 86_400;

const PAIR_FEE_BPS: u64 = 30;
const POOL_FEE_PIPS: u32 = 3_000;
/// Ticks either side of the starting price the whale's concentrated liquidity covers
const WHALE_TICKS: i32 = 12_000;

fn addr(byte: u8) -> Address {
    Address::with_last_byte(byte)
}

/// Protection venue the world wires in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HedgeSetup {
    None,
    /// One IL hedge paid and settled in B
    Single,
    /// A call settled in A plus a put settled in B
    DualOption,
}

pub struct SimWorldBuilder {
    amm: AmmKind,
    hedge: HedgeSetup,
    price: f64,
    decimals: (u8, u8),
    depth_a: u64,
    tick_spacing: i32,
    implied_volatility: f64,
    reward_per_sec: Option<u64>,
    stable_pool: bool,
    deposits: (u64, u64),
    config: JointConfig,
    provider_config: ProviderConfig,
}

impl Default for SimWorldBuilder {
    fn default() -> Self {
        let config = JointConfig {
            governance: addr(0xd0),
            keeper: addr(0xd1),
            ..JointConfig::default()
        };
        // premium and fees make small losses routine
        let provider_config = ProviderConfig {
            profit_limit_bps: 2_000,
            loss_limit_bps: 2_000,
            ..ProviderConfig::default()
        };
        Self {
            amm: AmmKind::ConstantProduct,
            hedge: HedgeSetup::Single,
            price: 0.5,
            decimals: (18, 6),
            depth_a: 1_000_000,
            tick_spacing: 60,
            implied_volatility: 0.8,
            reward_per_sec: None,
            stable_pool: false,
            deposits: (10_000, 5_000),
            config,
            provider_config,
        }
    }
}

impl SimWorldBuilder {
    pub fn amm(mut self, kind: AmmKind) -> Self {
        self.amm = kind;
        self
    }

    pub fn hedge(mut self, hedge: HedgeSetup) -> Self {
        self.hedge = hedge;
        self
    }

    /// Starting price in whole B per whole A.
    pub fn price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn decimals(mut self, a: u8, b: u8) -> Self {
        self.decimals = (a, b);
        self
    }

    /// Whole A the whale puts in the primary pool, matched with B at the price.
    pub fn depth(mut self, depth_a: u64) -> Self {
        self.depth_a = depth_a;
        self
    }

    pub fn tick_spacing(mut self, spacing: i32) -> Self {
        self.tick_spacing = spacing;
        self
    }

    pub fn implied_volatility(mut self, iv: f64) -> Self {
        self.implied_volatility = iv;
        self
    }

    /// Stakes constant-product liquidity in a chef emitting this many whole reward
    /// tokens per second.
    pub fn rewards(mut self, per_sec: u64) -> Self {
        self.reward_per_sec = Some(per_sec);
        self
    }

    /// Adds a stable pool for the alternate swap route. Only sensible near a 1:1 price.
    pub fn stable_pool(mut self) -> Self {
        self.stable_pool = true;
        self
    }

    /// Whole units each vault's depositor puts in.
    pub fn deposits(mut self, a: u64, b: u64) -> Self {
        self.deposits = (a, b);
        self
    }

    pub fn config(mut self, update: impl FnOnce(&mut JointConfig)) -> Self {
        update(&mut self.config);
        self
    }

    pub fn provider_config(mut self, update: impl FnOnce(&mut ProviderConfig)) -> Self {
        update(&mut self.provider_config);
        self
    }

    pub async fn build(self) -> Result<SimWorld, JointError> {
        let clock = Arc::new(ManualClock::new(START_TIME));
        let token_a = Token::new(addr(0x01), "WFTM", self.decimals.0);
        let token_b = Token::new(addr(0x02), "USDC", self.decimals.1);
        let reward = Token::new(addr(0x03), "BOO", 18);
        let raw_price = human_to_raw_price(self.price, self.decimals.0, self.decimals.1);

        let whale = addr(0xe0);
        let depositor = addr(0xe1);
        for token in [&token_a, &token_b, &reward] {
            token.mint(whale, token.units(1_000_000_000))?;
        }
        let oracle = Arc::new(RelayOracle::new(raw_price));

        let depth_a = token_a.units(self.depth_a);
        let depth_b = f64_to_u256(raw_to_f64(depth_a) * raw_price);
        let mut pair = None;
        let mut pool = None;
        let amm: Arc<dyn AmmAdapter>;
        let primary: Arc<dyn SwapVenue>;
        match self.amm {
            AmmKind::ConstantProduct => {
                let venue = Arc::new(ConstantProductPair::new(
                    addr(0x50),
                    token_a.clone(),
                    token_b.clone(),
                    PAIR_FEE_BPS,
                ));
                venue
                    .add_liquidity(whale, (depth_a, depth_b), (U256::ZERO, U256::ZERO))
                    .await?;
                amm = Arc::new(ConstantProductAdapter::new(
                    venue.clone(),
                    token_a.clone(),
                    token_b.clone(),
                )?);
                primary = venue.clone();
                pair = Some(venue);
            }
            AmmKind::Concentrated => {
                let venue = Arc::new(ConcentratedPool::new(
                    addr(0x70),
                    token_a.clone(),
                    token_b.clone(),
                    POOL_FEE_PIPS,
                    self.tick_spacing,
                    raw_price,
                ));
                let (lower, upper) =
                    window_around(venue.tick(), WHALE_TICKS / self.tick_spacing, self.tick_spacing);
                venue
                    .mint(whale, TickRange::new(lower, upper), (depth_a, depth_b))
                    .await?;
                amm = Arc::new(ConcentratedAdapter::new(
                    venue.clone(),
                    token_a.clone(),
                    token_b.clone(),
                    self.config.recenter.ticks_from_current,
                )?);
                primary = venue.clone();
                pool = Some(venue);
            }
        }

        let reward_pair = Arc::new(ConstantProductPair::new(
            addr(0x52),
            reward.clone(),
            token_a.clone(),
            PAIR_FEE_BPS,
        ));
        reward_pair
            .add_liquidity(
                whale,
                (reward.units(10_000_000), token_a.units(1_000_000)),
                (U256::ZERO, U256::ZERO),
            )
            .await?;

        let mut router = SwapRouter::new(primary).with_venue(reward_pair.clone());
        let stable = if self.stable_pool {
            let venue = Arc::new(StablePool::new(addr(0x51), token_a.clone(), token_b.clone(), 100.0, 4));
            venue.seed(whale, token_a.units(self.depth_a), token_b.units(self.depth_a))?;
            router = router.with_stable(venue.clone());
            Some(venue)
        } else {
            None
        };
        let router = Arc::new(router);

        let chef = match (self.reward_per_sec, &pair) {
            (Some(per_sec), Some(pair)) => {
                let chef = Arc::new(MasterChef::new(
                    addr(0x80),
                    pair.lp_token(),
                    reward.clone(),
                    reward.units(per_sec),
                    clock.clone(),
                ));
                reward.transfer(whale, chef.address(), reward.units(100_000_000))?;
                Some(chef)
            }
            _ => None,
        };

        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let hedge: Option<Arc<dyn HedgeProvider>> = match self.hedge {
            HedgeSetup::None => None,
            HedgeSetup::Single => {
                let venue = Arc::new(SimHedgil::new(
                    addr(0x90),
                    token_b.clone(),
                    oracle.clone(),
                    dyn_clock.clone(),
                    self.implied_volatility,
                ));
                token_b.transfer(whale, venue.address(), token_b.units(10_000_000))?;
                Some(Arc::new(HedgilProvider::new(venue, token_a.clone(), token_b.clone())?))
            }
            HedgeSetup::DualOption => {
                let call = Arc::new(SimOptions::new(
                    addr(0x91),
                    OptionKind::Call,
                    token_a.clone(),
                    oracle.clone(),
                    dyn_clock.clone(),
                    self.implied_volatility,
                ));
                let put = Arc::new(SimOptions::new(
                    addr(0x92),
                    OptionKind::Put,
                    token_b.clone(),
                    oracle.clone(),
                    dyn_clock.clone(),
                    self.implied_volatility,
                ));
                token_a.transfer(whale, call.address(), token_a.units(10_000_000))?;
                token_b.transfer(whale, put.address(), token_b.units(10_000_000))?;
                Some(Arc::new(DualOptionProvider::new(
                    call,
                    put,
                    token_a.clone(),
                    token_b.clone(),
                )?))
            }
        };

        let (provider_a_address, provider_b_address) = (addr(0xb1), addr(0xb2));
        let vault_a = Arc::new(SimVault::new(addr(0xa1), token_a.clone(), dyn_clock.clone()));
        let vault_b = Arc::new(SimVault::new(addr(0xa2), token_b.clone(), dyn_clock.clone()));
        for (vault, token, amount, strategy) in [
            (&vault_a, &token_a, self.deposits.0, provider_a_address),
            (&vault_b, &token_b, self.deposits.1, provider_b_address),
        ] {
            token.transfer(whale, depositor, token.units(amount))?;
            vault.deposit(depositor, token.units(amount))?;
            vault.add_strategy(strategy, BPS, U256::MAX)?;
        }

        let parts = JointParts {
            amm: amm.clone(),
            hedge: hedge.clone(),
            oracle: oracle.clone(),
            router: router.clone(),
            staking: chef.clone().map(|chef| chef as Arc<dyn StakingVenue>),
            provider_a: provider_a_address,
            provider_b: provider_b_address,
        };
        let joint = Joint::new(addr(0xc0), self.config.clone(), parts, dyn_clock)?;
        let provider_a = ProviderAdapter::new(
            provider_a_address,
            crate::Asset::A,
            vault_a.clone(),
            self.provider_config.clone(),
            &joint,
        )?;
        let provider_b = ProviderAdapter::new(
            provider_b_address,
            crate::Asset::B,
            vault_b.clone(),
            self.provider_config,
            &joint,
        )?;

        Ok(SimWorld {
            clock,
            token_a,
            token_b,
            reward,
            oracle,
            amm,
            pair,
            pool,
            stable,
            reward_pair,
            chef,
            hedge,
            router,
            vault_a,
            vault_b,
            joint,
            provider_a,
            provider_b,
            governance: self.config.governance,
            keeper: self.config.keeper,
            whale,
        })
    }
}

pub struct SimWorld {
    pub clock: Arc<ManualClock>,
    pub token_a: Token,
    pub token_b: Token,
    pub reward: Token,
    pub oracle: Arc<RelayOracle>,
    pub amm: Arc<dyn AmmAdapter>,
    pub pair: Option<Arc<ConstantProductPair>>,
    pub pool: Option<Arc<ConcentratedPool>>,
    pub stable: Option<Arc<StablePool>>,
    pub reward_pair: Arc<ConstantProductPair>,
    pub chef: Option<Arc<MasterChef>>,
    pub hedge: Option<Arc<dyn HedgeProvider>>,
    pub router: Arc<SwapRouter>,
    pub vault_a: Arc<SimVault>,
    pub vault_b: Arc<SimVault>,
    pub joint: Joint,
    pub provider_a: ProviderAdapter,
    pub provider_b: ProviderAdapter,
    pub governance: Address,
    pub keeper: Address,
    pub whale: Address,
}

impl SimWorld {
    pub fn builder() -> SimWorldBuilder {
        SimWorldBuilder::default()
    }

    pub fn advance(&self, secs: u64) {
        self.clock.advance(secs);
    }

    /// Pool price in whole B per whole A.
    pub async fn price(&self) -> Result<f64, JointError> {
        let raw = self.amm.current_price().await?;
        Ok(raw_to_human_price(raw, self.token_a.decimals(), self.token_b.decimals()))
    }

    /// Relays the pool price to the oracle.
    pub async fn sync_oracle(&self) -> Result<(), JointError> {
        self.oracle.relay(self.amm.current_price().await?);
        Ok(())
    }

    /// Trades the primary pool to `price` (whole B per whole A) and relays it.
    pub async fn move_price(&self, price: f64) -> Result<(), JointError> {
        let target = human_to_raw_price(price, self.token_a.decimals(), self.token_b.decimals());
        if let Some(pair) = &self.pair {
            self.trade_pair_to(pair, target).await?;
        }
        if let Some(pool) = &self.pool {
            self.trade_pool_to(pool, target).await?;
        }
        self.sync_oracle().await
    }

    /// Trades the concentrated pool into the middle of `tick` and relays the price.
    pub async fn move_to_tick(&self, tick: i32) -> Result<(), JointError> {
        if let Some(pool) = &self.pool {
            self.trade_pool_to(pool, price_at_tick(tick) * 1.0001f64.sqrt()).await?;
        }
        self.sync_oracle().await
    }

    async fn trade_pool_to(&self, pool: &ConcentratedPool, target: f64) -> Result<(), JointError> {
        let current = self.amm.current_price().await?;
        let token_in = if target < current { &self.token_a } else { &self.token_b };
        let budget = token_in.balance_of(self.whale);
        // A is token0, so the pool's sqrt price is sqrt(B per A)
        pool.swap_with_limit(self.whale, token_in.address(), budget, Some(target.sqrt()))?;
        Ok(())
    }

    /// Moves the price by `fraction` of itself, e.g. `-0.15` for a 15% drop.
    pub async fn move_price_by(&self, fraction: f64) -> Result<(), JointError> {
        let price = self.price().await?;
        self.move_price(price * (1.0 + fraction)).await
    }

    async fn trade_pair_to(&self, pair: &ConstantProductPair, target: f64) -> Result<(), JointError> {
        let reserves = self.amm.reserves().await?;
        let (reserve_a, reserve_b) = (raw_to_f64(reserves.reserve_a), raw_to_f64(reserves.reserve_b));
        let k = reserve_a * reserve_b;
        let after_fee = 1.0 - PAIR_FEE_BPS as f64 / BPS as f64;
        let (token_in, amount) = if target < reserves.price {
            (&self.token_a, ((k / target).sqrt() - reserve_a) / after_fee)
        } else {
            (&self.token_b, ((k * target).sqrt() - reserve_b) / after_fee)
        };
        let amount = f64_to_u256(amount);
        if amount.is_zero() {
            return Ok(());
        }
        pair.swap_exact_in(self.whale, token_in.address(), amount, U256::ZERO)
            .await?;
        Ok(())
    }

    /// Harvests provider A then provider B, the order a keeper would use.
    pub async fn harvest_providers(&mut self) -> Result<(ProviderReport, ProviderReport), JointError> {
        let keeper = self.keeper;
        let a = self.provider_a.harvest(keeper, &mut self.joint).await?;
        let b = self.provider_b.harvest(keeper, &mut self.joint).await?;
        Ok((a, b))
    }

    /// Funds both providers from their vaults and opens an epoch.
    pub async fn start_epoch(&mut self) -> Result<u64, JointError> {
        let (a, b) = self.harvest_providers().await?;
        a.invested
            .or(b.invested)
            .ok_or_else(|| StateViolation::NotFunded(self.joint.pending()).into())
    }
}
