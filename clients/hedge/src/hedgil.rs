use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::Token;
use parking_lot::Mutex;
use tracing::{info, warn};
use utils::{raw_to_f64, PairAmounts};

use crate::{HedgeError, HedgeId, HedgeKind, HedgePosition, HedgeProvider, HedgeQuote, HedgeRequest};

/// Position information from a single-instrument hedge venue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HedgilInfo {
    pub id: u64,
    /// Raw A covered
    pub notional: U256,
    /// Raw B per raw A at open
    pub strike: f64,
    pub range_bps: u64,
    pub opened_at: u64,
    pub expiration: u64,
    /// Premium paid, in the payment token
    pub cost: U256,
    pub closed: bool,
}

/// Single-instrument IL hedge: priced, paid and settled in one token.
#[async_trait]
pub trait HedgilVenue: Send + Sync {
    fn payment_token(&self) -> Token;

    /// Current oracle price the venue would strike at.
    async fn current_price(&self) -> Result<f64, HedgeError>;

    async fn quote_cost(
        &self,
        notional: U256,
        range_bps: u64,
        period_secs: u64,
    ) -> Result<U256, HedgeError>;

    async fn open(
        &self,
        payer: Address,
        notional: U256,
        range_bps: u64,
        period_secs: u64,
        max_cost: U256,
    ) -> Result<u64, HedgeError>;

    async fn current_payout(&self, id: u64) -> Result<U256, HedgeError>;

    /// Seconds until expiry, zero once expired or closed.
    async fn time_to_maturity(&self, id: u64) -> Result<u64, HedgeError>;

    /// Pays the current payout to `recipient` and marks the hedge closed.
    async fn close(&self, id: u64, recipient: Address) -> Result<U256, HedgeError>;

    async fn info(&self, id: u64) -> Result<HedgilInfo, HedgeError>;
}

#[derive(Debug, Default)]
struct Book {
    active: Option<HedgeId>,
    positions: BTreeMap<HedgeId, HedgePosition>,
}

/// [`HedgeProvider`] over a [`HedgilVenue`] paid and settled in B.
pub struct HedgilProvider {
    venue: Arc<dyn HedgilVenue>,
    token_a: Token,
    token_b: Token,
    book: Mutex<Book>,
}

impl HedgilProvider {
    pub fn new(venue: Arc<dyn HedgilVenue>, token_a: Token, token_b: Token) -> Result<Self, HedgeError> {
        if venue.payment_token() != token_b {
            return Err(HedgeError::InvalidParameters(format!(
                "hedgil pays in {}, expected {}",
                venue.payment_token().symbol(),
                token_b.symbol()
            )));
        }
        Ok(Self {
            venue,
            token_a,
            token_b,
            book: Mutex::new(Book::default()),
        })
    }

    fn in_b(amount: U256) -> PairAmounts {
        PairAmounts::new(U256::ZERO, amount)
    }

    fn known(&self, id: HedgeId) -> Result<HedgePosition, HedgeError> {
        self.book
            .lock()
            .positions
            .get(&id)
            .copied()
            .ok_or(HedgeError::UnknownPosition(id))
    }
}

#[async_trait]
impl HedgeProvider for HedgilProvider {
    fn kind(&self) -> HedgeKind {
        HedgeKind::Single
    }

    fn active(&self) -> Option<HedgeId> {
        self.book.lock().active
    }

    async fn quote(&self, request: &HedgeRequest) -> Result<HedgeQuote, HedgeError> {
        let strike = self.venue.current_price().await?;
        let cost = self
            .venue
            .quote_cost(request.notional, request.range_bps, request.period_secs)
            .await?;
        Ok(HedgeQuote {
            cost: Self::in_b(cost),
            cost_value: raw_to_f64(cost),
            strike,
        })
    }

    async fn open(&self, payer: Address, request: &HedgeRequest) -> Result<HedgeId, HedgeError> {
        if let Some(active) = self.active() {
            return Err(HedgeError::AlreadyActive(active));
        }
        let quote = self.quote(request).await?;
        if quote.cost_value > request.max_cost_value {
            return Err(HedgeError::BudgetExceeded {
                cost: quote.cost_value,
                budget: request.max_cost_value,
            });
        }
        let venue_id = self
            .venue
            .open(
                payer,
                request.notional,
                request.range_bps,
                request.period_secs,
                quote.cost.b,
            )
            .await?;
        let info = self.venue.info(venue_id).await?;
        let id = HedgeId(venue_id);
        let position = HedgePosition {
            id,
            kind: HedgeKind::Single,
            strike: info.strike,
            notional: info.notional,
            range_bps: info.range_bps,
            opened_at: info.opened_at,
            expiration: info.expiration,
            cost: Self::in_b(info.cost),
            settled: PairAmounts::ZERO,
            closed: false,
        };
        {
            let mut book = self.book.lock();
            book.positions.insert(id, position);
            book.active = Some(id);
        }
        info!(
            hedge = %id,
            notional = %info.notional,
            notional_token = self.token_a.symbol(),
            strike = info.strike,
            range_bps = info.range_bps,
            cost = %info.cost,
            token = self.token_b.symbol(),
            "opened hedgil"
        );
        Ok(id)
    }

    async fn payout(&self, id: HedgeId) -> Result<PairAmounts, HedgeError> {
        if self.known(id)?.closed {
            return Ok(PairAmounts::ZERO);
        }
        Ok(Self::in_b(self.venue.current_payout(id.0).await?))
    }

    async fn cost(&self, id: HedgeId) -> Result<PairAmounts, HedgeError> {
        Ok(self.known(id)?.cost)
    }

    async fn time_to_maturity(&self, id: HedgeId) -> Result<u64, HedgeError> {
        if self.known(id)?.closed {
            return Ok(0);
        }
        self.venue.time_to_maturity(id.0).await
    }

    async fn close(&self, id: HedgeId, recipient: Address) -> Result<PairAmounts, HedgeError> {
        let position = self.known(id)?;
        if position.closed {
            return Ok(PairAmounts::ZERO);
        }
        let paid = self.venue.close(id.0, recipient).await?;
        let settled = Self::in_b(paid);
        {
            let mut book = self.book.lock();
            if let Some(entry) = book.positions.get_mut(&id) {
                entry.closed = true;
                entry.settled = settled;
            }
            if book.active == Some(id) {
                book.active = None;
            }
        }
        if paid.is_zero() {
            warn!(hedge = %id, "hedgil closed with no payout");
        } else {
            info!(hedge = %id, payout = %paid, token = self.token_b.symbol(), "closed hedgil");
        }
        Ok(settled)
    }

    async fn position(&self, id: HedgeId) -> Result<HedgePosition, HedgeError> {
        self.known(id)
    }
}
