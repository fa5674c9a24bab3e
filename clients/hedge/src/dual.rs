use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::{Token, TokenError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utils::{f64_to_u256, raw_to_f64, PairAmounts};

use crate::pricing::{call_amount, put_amount, range_fraction};
use crate::{HedgeError, HedgeId, HedgeKind, HedgePosition, HedgeProvider, HedgeQuote, HedgeRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    Call,
    Put,
}

/// Option information from an options venue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionInfo {
    pub id: u64,
    pub kind: OptionKind,
    /// Raw A the option is written on
    pub amount: U256,
    pub strike: f64,
    /// Distance from strike to the payout cap, in bps
    pub range_bps: u64,
    pub opened_at: u64,
    pub expiration: u64,
    /// Premium paid, in the settlement token
    pub cost: U256,
    pub exercised: bool,
}

/// Capped option venue. Calls settle in A, puts settle in B.
#[async_trait]
pub trait OptionsVenue: Send + Sync {
    fn kind(&self) -> OptionKind;

    fn settlement_token(&self) -> Token;

    async fn current_price(&self) -> Result<f64, HedgeError>;

    async fn quote_cost(
        &self,
        amount: U256,
        range_bps: u64,
        period_secs: u64,
    ) -> Result<U256, HedgeError>;

    async fn buy(
        &self,
        payer: Address,
        amount: U256,
        range_bps: u64,
        period_secs: u64,
        max_cost: U256,
    ) -> Result<u64, HedgeError>;

    async fn current_payout(&self, id: u64) -> Result<U256, HedgeError>;

    async fn time_to_maturity(&self, id: u64) -> Result<u64, HedgeError>;

    /// Pays the current payout to `recipient`; exercising twice pays nothing.
    async fn exercise(&self, id: u64, recipient: Address) -> Result<U256, HedgeError>;

    async fn info(&self, id: u64) -> Result<OptionInfo, HedgeError>;
}

#[derive(Debug, Clone, Copy)]
struct Legs {
    call: u64,
    put: u64,
}

#[derive(Debug, Default)]
struct Book {
    next_id: u64,
    active: Option<HedgeId>,
    positions: BTreeMap<HedgeId, (HedgePosition, Legs)>,
}

/// [`HedgeProvider`] buying a call and a put sized so each leg covers the position's
/// loss at its edge of the protection range.
pub struct DualOptionProvider {
    call: Arc<dyn OptionsVenue>,
    put: Arc<dyn OptionsVenue>,
    token_a: Token,
    token_b: Token,
    book: Mutex<Book>,
}

impl DualOptionProvider {
    pub fn new(
        call: Arc<dyn OptionsVenue>,
        put: Arc<dyn OptionsVenue>,
        token_a: Token,
        token_b: Token,
    ) -> Result<Self, HedgeError> {
        if call.kind() != OptionKind::Call || call.settlement_token() != token_a {
            return Err(HedgeError::InvalidParameters(
                "call venue must settle calls in A".to_string(),
            ));
        }
        if put.kind() != OptionKind::Put || put.settlement_token() != token_b {
            return Err(HedgeError::InvalidParameters(
                "put venue must settle puts in B".to_string(),
            ));
        }
        Ok(Self {
            call,
            put,
            token_a,
            token_b,
            book: Mutex::new(Book {
                next_id: 1,
                ..Book::default()
            }),
        })
    }

    fn known(&self, id: HedgeId) -> Result<(HedgePosition, Legs), HedgeError> {
        self.book
            .lock()
            .positions
            .get(&id)
            .copied()
            .ok_or(HedgeError::UnknownPosition(id))
    }

    fn leg_amounts(request: &HedgeRequest) -> (U256, U256) {
        let range = range_fraction(request.range_bps);
        let notional = raw_to_f64(request.notional);
        (
            f64_to_u256(call_amount(notional, range)),
            f64_to_u256(put_amount(notional, range)),
        )
    }

    /// Call and put payouts for `id`, as `(a, b)`.
    pub async fn leg_payouts(&self, id: HedgeId) -> Result<PairAmounts, HedgeError> {
        let (position, legs) = self.known(id)?;
        if position.closed {
            return Ok(PairAmounts::ZERO);
        }
        Ok(PairAmounts::new(
            self.call.current_payout(legs.call).await?,
            self.put.current_payout(legs.put).await?,
        ))
    }
}

#[async_trait]
impl HedgeProvider for DualOptionProvider {
    fn kind(&self) -> HedgeKind {
        HedgeKind::DualOption
    }

    fn active(&self) -> Option<HedgeId> {
        self.book.lock().active
    }

    async fn quote(&self, request: &HedgeRequest) -> Result<HedgeQuote, HedgeError> {
        if request.range_bps == 0 {
            return Err(HedgeError::InvalidParameters("zero protection range".to_string()));
        }
        let strike = self.call.current_price().await?;
        let (call_size, put_size) = Self::leg_amounts(request);
        let call_cost = self
            .call
            .quote_cost(call_size, request.range_bps, request.period_secs)
            .await?;
        let put_cost = self
            .put
            .quote_cost(put_size, request.range_bps, request.period_secs)
            .await?;
        let cost = PairAmounts::new(call_cost, put_cost);
        debug!(%call_size, %put_size, cost = %cost, strike, "quoted dual options");
        Ok(HedgeQuote {
            cost,
            cost_value: cost.value_in_b(strike),
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
        // both premiums must be payable before the first leg is bought
        for (token, amount) in [(&self.token_a, quote.cost.a), (&self.token_b, quote.cost.b)] {
            let balance = token.balance_of(payer);
            if balance < amount {
                return Err(TokenError::InsufficientBalance {
                    symbol: token.symbol().to_string(),
                    account: payer,
                    balance,
                    required: amount,
                }
                .into());
            }
        }

        let (call_size, put_size) = Self::leg_amounts(request);
        let call_id = self
            .call
            .buy(payer, call_size, request.range_bps, request.period_secs, quote.cost.a)
            .await?;
        let put_id = self
            .put
            .buy(payer, put_size, request.range_bps, request.period_secs, quote.cost.b)
            .await?;
        let call = self.call.info(call_id).await?;
        let put = self.put.info(put_id).await?;

        let mut book = self.book.lock();
        let id = HedgeId(book.next_id);
        book.next_id += 1;
        let position = HedgePosition {
            id,
            kind: HedgeKind::DualOption,
            strike: call.strike,
            notional: request.notional,
            range_bps: request.range_bps,
            opened_at: call.opened_at,
            expiration: call.expiration.min(put.expiration),
            cost: PairAmounts::new(call.cost, put.cost),
            settled: PairAmounts::ZERO,
            closed: false,
        };
        book.positions.insert(
            id,
            (
                position,
                Legs {
                    call: call_id,
                    put: put_id,
                },
            ),
        );
        book.active = Some(id);
        info!(
            hedge = %id,
            call = call_id,
            put = put_id,
            strike = call.strike,
            cost = %position.cost,
            "opened call and put"
        );
        Ok(id)
    }

    async fn payout(&self, id: HedgeId) -> Result<PairAmounts, HedgeError> {
        self.leg_payouts(id).await
    }

    async fn cost(&self, id: HedgeId) -> Result<PairAmounts, HedgeError> {
        Ok(self.known(id)?.0.cost)
    }

    async fn time_to_maturity(&self, id: HedgeId) -> Result<u64, HedgeError> {
        let (position, legs) = self.known(id)?;
        if position.closed {
            return Ok(0);
        }
        let call = self.call.time_to_maturity(legs.call).await?;
        let put = self.put.time_to_maturity(legs.put).await?;
        Ok(call.min(put))
    }

    async fn close(&self, id: HedgeId, recipient: Address) -> Result<PairAmounts, HedgeError> {
        let (position, legs) = self.known(id)?;
        if position.closed {
            return Ok(PairAmounts::ZERO);
        }
        let from_call = self.call.exercise(legs.call, recipient).await?;
        let from_put = self.put.exercise(legs.put, recipient).await?;
        let settled = PairAmounts::new(from_call, from_put);
        let mut book = self.book.lock();
        if let Some((entry, _)) = book.positions.get_mut(&id) {
            entry.closed = true;
            entry.settled = settled;
        }
        if book.active == Some(id) {
            book.active = None;
        }
        info!(hedge = %id, payout = %settled, "closed call and put");
        Ok(settled)
    }

    async fn position(&self, id: HedgeId) -> Result<HedgePosition, HedgeError> {
        Ok(self.known(id)?.0)
    }
}
