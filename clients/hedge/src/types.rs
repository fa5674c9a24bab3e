use std::fmt;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use utils::PairAmounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HedgeId(pub u64);

impl fmt::Display for HedgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HedgeKind {
    /// One instrument covering the pair's relative move, paid and settled in B
    Single,
    /// A call settled in A and a put settled in B
    DualOption,
}

/// Protection wanted for one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HedgeRequest {
    /// Raw A amount the hedge covers
    pub notional: U256,
    /// Maximum relative move covered, in bps
    pub range_bps: u64,
    pub period_secs: u64,
    /// Premium ceiling, in raw B value
    pub max_cost_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HedgeQuote {
    /// Premium per asset
    pub cost: PairAmounts,
    /// Premium valued in raw B at the strike
    pub cost_value: f64,
    /// Raw B per raw A
    pub strike: f64,
}

/// One hedge as the provider tracks it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HedgePosition {
    pub id: HedgeId,
    pub kind: HedgeKind,
    pub strike: f64,
    pub notional: U256,
    pub range_bps: u64,
    pub opened_at: u64,
    pub expiration: u64,
    pub cost: PairAmounts,
    /// Payout received on close
    pub settled: PairAmounts,
    pub closed: bool,
}
