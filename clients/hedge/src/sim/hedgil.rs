use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::Token;
use clients_oracle::PriceOracle;
use parking_lot::Mutex;
use tracing::debug;
use utils::{f64_to_u256, f64_to_u256_ceil, raw_to_f64, Clock};

use crate::pricing::{il_payout, max_il_payout, premium, range_fraction};
use crate::{HedgeError, HedgilInfo, HedgilVenue};

#[derive(Debug, Default)]
struct Book {
    next_id: u64,
    hedges: BTreeMap<u64, HedgilInfo>,
}

/// Hedge writer that prices off an oracle with a fixed implied volatility and pays
/// from its own `payment` balance.
pub struct SimHedgil {
    address: Address,
    payment: Token,
    oracle: Arc<dyn PriceOracle>,
    clock: Arc<dyn Clock>,
    implied_volatility: f64,
    book: Mutex<Book>,
}

impl SimHedgil {
    pub fn new(
        address: Address,
        payment: Token,
        oracle: Arc<dyn PriceOracle>,
        clock: Arc<dyn Clock>,
        implied_volatility: f64,
    ) -> Self {
        Self {
            address,
            payment,
            oracle,
            clock,
            implied_volatility,
            book: Mutex::new(Book {
                next_id: 1,
                ..Book::default()
            }),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn hedge(&self, id: u64) -> Result<HedgilInfo, HedgeError> {
        self.book
            .lock()
            .hedges
            .get(&id)
            .copied()
            .ok_or(HedgeError::UnknownPosition(crate::HedgeId(id)))
    }

    fn price_cost(&self, strike: f64, notional: U256, range_bps: u64, period_secs: u64) -> U256 {
        let range = range_fraction(range_bps);
        let cap = max_il_payout(raw_to_f64(notional), strike, range);
        f64_to_u256_ceil(premium(cap, self.implied_volatility, period_secs, range))
    }
}

#[async_trait]
impl HedgilVenue for SimHedgil {
    fn payment_token(&self) -> Token {
        self.payment.clone()
    }

    async fn current_price(&self) -> Result<f64, HedgeError> {
        Ok(self.oracle.spot_price().await?)
    }

    async fn quote_cost(
        &self,
        notional: U256,
        range_bps: u64,
        period_secs: u64,
    ) -> Result<U256, HedgeError> {
        let strike = self.oracle.spot_price().await?;
        Ok(self.price_cost(strike, notional, range_bps, period_secs))
    }

    async fn open(
        &self,
        payer: Address,
        notional: U256,
        range_bps: u64,
        period_secs: u64,
        max_cost: U256,
    ) -> Result<u64, HedgeError> {
        if notional.is_zero() || range_bps == 0 || period_secs == 0 {
            return Err(HedgeError::InvalidParameters(format!(
                "notional {notional}, range {range_bps} bps, period {period_secs}s"
            )));
        }
        let strike = self.oracle.spot_price().await?;
        let cost = self.price_cost(strike, notional, range_bps, period_secs);
        if cost > max_cost {
            return Err(HedgeError::BudgetExceeded {
                cost: raw_to_f64(cost),
                budget: raw_to_f64(max_cost),
            });
        }
        self.payment.transfer(payer, self.address, cost)?;

        let now = self.clock.now();
        let mut book = self.book.lock();
        let id = book.next_id;
        book.next_id += 1;
        book.hedges.insert(
            id,
            HedgilInfo {
                id,
                notional,
                strike,
                range_bps,
                opened_at: now,
                expiration: now + period_secs,
                cost,
                closed: false,
            },
        );
        debug!(id, %notional, strike, %cost, "hedgil written");
        Ok(id)
    }

    async fn current_payout(&self, id: u64) -> Result<U256, HedgeError> {
        let hedge = self.hedge(id)?;
        if hedge.closed || self.clock.now() >= hedge.expiration {
            return Ok(U256::ZERO);
        }
        let price = self.oracle.spot_price().await?;
        let value = il_payout(
            raw_to_f64(hedge.notional),
            hedge.strike,
            price,
            range_fraction(hedge.range_bps),
        );
        Ok(f64_to_u256(value))
    }

    async fn time_to_maturity(&self, id: u64) -> Result<u64, HedgeError> {
        let hedge = self.hedge(id)?;
        if hedge.closed {
            return Ok(0);
        }
        Ok(hedge.expiration.saturating_sub(self.clock.now()))
    }

    async fn close(&self, id: u64, recipient: Address) -> Result<U256, HedgeError> {
        let payout = self.current_payout(id).await?;
        {
            let mut book = self.book.lock();
            match book.hedges.get_mut(&id) {
                Some(hedge) if !hedge.closed => hedge.closed = true,
                _ => return Ok(U256::ZERO),
            }
        }
        self.payment.transfer(self.address, recipient, payout)?;
        debug!(id, %payout, "hedgil closed");
        Ok(payout)
    }

    async fn info(&self, id: u64) -> Result<HedgilInfo, HedgeError> {
        self.hedge(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HedgeProvider, HedgeRequest, HedgilProvider};
    use clients_oracle::RelayOracle;
    use utils::ManualClock;

    const DAY: u64 = 86_400;

    struct Fixture {
        a: Token,
        b: Token,
        oracle: Arc<RelayOracle>,
        clock: Arc<ManualClock>,
        venue: Arc<SimHedgil>,
        payer: Address,
    }

    fn fixture() -> Fixture {
        let a = Token::new(Address::with_last_byte(1), "WFTM", 18);
        let b = Token::new(Address::with_last_byte(2), "USDC", 18);
        let oracle = Arc::new(RelayOracle::new(2.0));
        let clock = Arc::new(ManualClock::new(1_000_000));
        let venue = Arc::new(SimHedgil::new(
            Address::with_last_byte(0x70),
            b.clone(),
            oracle.clone(),
            clock.clone(),
            0.8,
        ));
        let payer = Address::with_last_byte(0x10);
        b.mint(payer, b.units(1_000)).unwrap();
        b.mint(venue.address(), b.units(100_000)).unwrap();
        Fixture {
            a,
            b,
            oracle,
            clock,
            venue,
            payer,
        }
    }

    fn request(f: &Fixture) -> HedgeRequest {
        HedgeRequest {
            notional: f.a.units(1_000),
            range_bps: 1_500,
            period_secs: 3 * DAY,
            max_cost_value: raw_to_f64(f.b.units(100)),
        }
    }

    #[tokio::test]
    async fn pays_il_on_a_dump_and_closes_once() {
        let f = fixture();
        let provider = HedgilProvider::new(f.venue.clone(), f.a.clone(), f.b.clone()).unwrap();
        let id = provider.open(f.payer, &request(&f)).await.unwrap();
        assert_eq!(provider.active(), Some(id));
        let cost = provider.cost(id).await.unwrap();
        assert!(cost.a.is_zero() && !cost.b.is_zero());
        assert_eq!(provider.payout(id).await.unwrap().b, U256::ZERO);

        f.oracle.relay(1.7);
        f.clock.advance(DAY);
        let expected = provider.payout(id).await.unwrap().b;
        // 1000 * (1.7 + 2 - 2 * sqrt(3.4)) ~= 12.2 B
        assert!(expected > f.b.units(12) && expected < f.b.units(13));

        let before = f.b.balance_of(f.payer);
        let settled = provider.close(id, f.payer).await.unwrap();
        assert_eq!(settled.b, expected);
        assert_eq!(f.b.balance_of(f.payer), before + expected);
        assert_eq!(provider.active(), None);
        assert!(provider.close(id, f.payer).await.unwrap().is_zero());
        assert_eq!(f.b.balance_of(f.payer), before + expected);
    }

    #[tokio::test]
    async fn over_budget_hedge_is_rejected_without_payment() {
        let f = fixture();
        let provider = HedgilProvider::new(f.venue.clone(), f.a.clone(), f.b.clone()).unwrap();
        let mut tight = request(&f);
        tight.max_cost_value = 1.0;
        let err = provider.open(f.payer, &tight).await.unwrap_err();
        assert!(matches!(err, HedgeError::BudgetExceeded { .. }));
        assert_eq!(f.b.balance_of(f.payer), f.b.units(1_000));
        assert_eq!(provider.active(), None);
    }

    #[tokio::test]
    async fn second_open_while_active_fails() {
        let f = fixture();
        let provider = HedgilProvider::new(f.venue.clone(), f.a.clone(), f.b.clone()).unwrap();
        let id = provider.open(f.payer, &request(&f)).await.unwrap();
        assert!(matches!(
            provider.open(f.payer, &request(&f)).await,
            Err(HedgeError::AlreadyActive(active)) if active == id
        ));
    }

    #[tokio::test]
    async fn expired_hedge_pays_nothing() {
        let f = fixture();
        let provider = HedgilProvider::new(f.venue.clone(), f.a.clone(), f.b.clone()).unwrap();
        let id = provider.open(f.payer, &request(&f)).await.unwrap();
        f.oracle.relay(1.5);
        f.clock.advance(3 * DAY);
        assert_eq!(provider.time_to_maturity(id).await.unwrap(), 0);
        assert!(provider.payout(id).await.unwrap().is_zero());
    }

    #[test]
    fn payment_token_must_be_b() {
        let f = fixture();
        assert!(HedgilProvider::new(f.venue.clone(), f.b.clone(), f.a.clone()).is_err());
    }
}
