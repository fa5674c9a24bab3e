use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use utils::PairAmounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmmKind {
    ConstantProduct,
    Concentrated,
}

/// Half-open tick window `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRange {
    pub lower: i32,
    pub upper: i32,
}

impl TickRange {
    pub fn new(lower: i32, upper: i32) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, tick: i32) -> bool {
        self.lower <= tick && tick < self.upper
    }

    pub fn width(&self) -> i32 {
        self.upper - self.lower
    }
}

/// Read-only view of a pool in the joint's A/B orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReservesSnapshot {
    pub reserve_a: U256,
    pub reserve_b: U256,
    /// Raw B per raw A
    pub price: f64,
    /// Current tick, concentrated venues only
    pub tick: Option<i32>,
}

/// Position information for one owner, in A/B orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionData {
    /// Liquidity units held by the owner
    pub liquidity: U256,
    /// Tick window, concentrated venues only
    pub range: Option<TickRange>,
    /// Amounts the liquidity would withdraw at the current price
    pub withdrawable: PairAmounts,
    /// Fees and burned principal waiting to be collected
    pub collectable: PairAmounts,
}

/// What a deposit would use and mint at the current price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepositQuote {
    pub used: PairAmounts,
    pub liquidity: U256,
}
