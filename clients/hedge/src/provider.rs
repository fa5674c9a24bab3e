use alloy::primitives::Address;
use async_trait::async_trait;
use utils::PairAmounts;

use crate::{HedgeError, HedgeId, HedgeKind, HedgePosition, HedgeQuote, HedgeRequest};

/// Protection venue as the joint sees it. At most one hedge is active at a time.
#[async_trait]
pub trait HedgeProvider: Send + Sync {
    fn kind(&self) -> HedgeKind;

    /// Currently open hedge, if any.
    fn active(&self) -> Option<HedgeId>;

    async fn quote(&self, request: &HedgeRequest) -> Result<HedgeQuote, HedgeError>;

    /// Opens a hedge paid by `payer`; strike is the current oracle price.
    ///
    /// Fails with [`HedgeError::BudgetExceeded`] when the premium exceeds
    /// `request.max_cost_value`, and with [`HedgeError::AlreadyActive`] while another
    /// hedge is open.
    async fn open(&self, payer: Address, request: &HedgeRequest) -> Result<HedgeId, HedgeError>;

    /// What closing now would pay, per asset. Zero once closed or expired.
    async fn payout(&self, id: HedgeId) -> Result<PairAmounts, HedgeError>;

    async fn cost(&self, id: HedgeId) -> Result<PairAmounts, HedgeError>;

    async fn time_to_maturity(&self, id: HedgeId) -> Result<u64, HedgeError>;

    /// Settles the hedge into `recipient`. A second close pays nothing.
    async fn close(&self, id: HedgeId, recipient: Address) -> Result<PairAmounts, HedgeError>;

    async fn position(&self, id: HedgeId) -> Result<HedgePosition, HedgeError>;
}
