//! Shared types for the joint strategy.

use std::fmt;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use utils::PairAmounts;

use crate::EpochPhase;

/// One side of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Asset {
    A,
    B,
}

impl Asset {
    pub fn other(self) -> Self {
        match self {
            Asset::A => Asset::B,
            Asset::B => Asset::A,
        }
    }

    /// This side's amount out of a pair.
    pub fn of(self, amounts: PairAmounts) -> U256 {
        match self {
            Asset::A => amounts.a,
            Asset::B => amounts.b,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::A => f.write_str("A"),
            Asset::B => f.write_str("B"),
        }
    }
}

/// Who may call an entrypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Governance,
    Keeper,
    Provider,
}

/// Outcome of one epoch, recorded when it returns to idle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Settlement {
    pub epoch_id: u64,
    /// Capital the providers had in the epoch
    pub provided: PairAmounts,
    /// Handed back to the providers, A to the A provider and B to the B provider
    pub returned: PairAmounts,
    pub hedge_cost: PairAmounts,
    pub hedge_payout: PairAmounts,
    /// A and B bought with reward tokens while closing
    pub rewards_converted: PairAmounts,
    pub ended_at: u64,
}

impl Settlement {
    /// Realised return per side, as a fraction of what was provided.
    pub fn returns(&self) -> (f64, f64) {
        let ratio = |returned: U256, provided: U256| {
            if provided.is_zero() {
                0.0
            } else {
                utils::raw_to_f64(returned) / utils::raw_to_f64(provided) - 1.0
            }
        };
        (
            ratio(self.returned.a, self.provided.a),
            ratio(self.returned.b, self.provided.b),
        )
    }
}

/// What one compounding harvest moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HarvestReport {
    /// Reward tokens claimed from staking
    pub claimed: U256,
    /// Swap fees collected from the pool
    pub fees: PairAmounts,
    /// A and B bought with reward tokens
    pub converted: PairAmounts,
    /// Loose A and B put back into the position
    pub redeposited: PairAmounts,
}

/// What a provider's harvest did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProviderReport {
    pub provider: Address,
    pub asset: Asset,
    pub gain: U256,
    pub loss: U256,
    pub debt_payment: U256,
    /// Debt still owed to the vault after the report
    pub debt_outstanding: U256,
    /// Epoch this harvest closed, if any
    pub settlement: Option<Settlement>,
    /// Epoch this harvest opened, if any
    pub invested: Option<u64>,
}

/// Point-in-time view of the joint in human units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointSnapshot {
    /// Unix seconds at which the snapshot was taken
    pub timestamp: u64,
    pub phase: EpochPhase,
    pub epoch_id: Option<u64>,
    /// Pool price, B per A
    pub price: f64,
    /// A the position would withdraw at the current price
    pub position_a: f64,
    /// B the position would withdraw at the current price
    pub position_b: f64,
    pub collectable_a: f64,
    pub collectable_b: f64,
    /// A and B held by the joint outside the position
    pub loose_a: f64,
    pub loose_b: f64,
    /// Raw liquidity units staked for rewards
    pub staked_liquidity: String,
    /// Current hedge payout valued in B
    pub hedge_payout_value: f64,
    /// Premium paid for the active hedge valued in B
    pub hedge_cost_value: f64,
    pub pending_rewards_a: f64,
    pub pending_rewards_b: f64,
    /// A and B the providers would get back if the epoch ended now
    pub estimated_a: f64,
    pub estimated_b: f64,
    /// Estimated total valued in B
    pub estimated_value_b: f64,
    pub in_range: bool,
    pub tick_lower: Option<i32>,
    pub tick_upper: Option<i32>,
}
