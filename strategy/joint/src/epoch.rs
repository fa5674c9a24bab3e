//! Epoch lifecycle: one owned state value instead of scattered flags.

use std::fmt;

use alloy::primitives::U256;
use clients_amm::TickRange;
use clients_hedge::HedgeId;
use serde::{Deserialize, Serialize};
use utils::PairAmounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochPhase {
    Idle,
    Open,
    Recentering,
    Closing,
}

impl fmt::Display for EpochPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EpochPhase::Idle => "idle",
            EpochPhase::Open => "open",
            EpochPhase::Recentering => "recentering",
            EpochPhase::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// One open-to-closed lifecycle of the paired position.
#[derive(Debug, Clone, PartialEq)]
pub struct Epoch {
    pub id: u64,
    pub started_at: u64,
    pub period_secs: u64,
    pub min_time_to_maturity_secs: u64,
    pub protection_range_bps: u64,
    pub hedge_budget_bps: u64,
    /// Price the range breach is measured from: the hedge strike, or the pool price
    /// when unhedged
    pub entry_price: f64,
    /// Capital the providers committed, premium included
    pub provided: PairAmounts,
    /// Amounts deposited into the pool so far
    pub invested: PairAmounts,
    /// Liquidity units the joint holds in the pool
    pub liquidity: U256,
    /// Part of `liquidity` staked for rewards
    pub staked: U256,
    pub range: Option<TickRange>,
    /// Active hedge; cleared once closed
    pub hedge: Option<HedgeId>,
    pub hedge_cost: PairAmounts,
    pub hedge_payout: PairAmounts,
    /// A and B bought with reward tokens during the epoch
    pub rewards_converted: PairAmounts,
    pub recenters: u32,
}

impl Epoch {
    pub fn ends_at(&self) -> u64 {
        self.started_at.saturating_add(self.period_secs)
    }

    /// Nothing left in the pool or with the hedge venue.
    pub fn is_unwound(&self) -> bool {
        self.liquidity.is_zero() && self.hedge.is_none()
    }
}

/// The joint's single epoch slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EpochState {
    #[default]
    Idle,
    Open(Epoch),
    /// Liquidity withdrawn from the old window, not yet redeposited
    Recentering(Epoch),
    /// Position unwound or being unwound; settles back to idle
    Closing(Epoch),
}

impl EpochState {
    pub fn phase(&self) -> EpochPhase {
        match self {
            EpochState::Idle => EpochPhase::Idle,
            EpochState::Open(_) => EpochPhase::Open,
            EpochState::Recentering(_) => EpochPhase::Recentering,
            EpochState::Closing(_) => EpochPhase::Closing,
        }
    }

    pub fn epoch(&self) -> Option<&Epoch> {
        match self {
            EpochState::Idle => None,
            EpochState::Open(epoch) | EpochState::Recentering(epoch) | EpochState::Closing(epoch) => {
                Some(epoch)
            }
        }
    }

    pub fn epoch_mut(&mut self) -> Option<&mut Epoch> {
        match self {
            EpochState::Idle => None,
            EpochState::Open(epoch) | EpochState::Recentering(epoch) | EpochState::Closing(epoch) => {
                Some(epoch)
            }
        }
    }

    /// Moves the state out, leaving idle behind.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Same epoch under a new phase. Idle stays idle.
    pub fn into_phase(self, phase: EpochPhase) -> Self {
        let epoch = match self {
            EpochState::Idle => return EpochState::Idle,
            EpochState::Open(epoch) | EpochState::Recentering(epoch) | EpochState::Closing(epoch) => epoch,
        };
        match phase {
            EpochPhase::Idle => EpochState::Idle,
            EpochPhase::Open => EpochState::Open(epoch),
            EpochPhase::Recentering => EpochState::Recentering(epoch),
            EpochPhase::Closing => EpochState::Closing(epoch),
        }
    }
}
