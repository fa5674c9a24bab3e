use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::Token;
use clients_oracle::PriceOracle;
use parking_lot::Mutex;
use tracing::debug;
use utils::{f64_to_u256, f64_to_u256_ceil, raw_to_f64, Clock};

use crate::pricing::{call_payout_value, premium, put_payout_value, range_fraction};
use crate::{HedgeError, HedgeId, OptionInfo, OptionKind, OptionsVenue};

#[derive(Debug, Default)]
struct Book {
    next_id: u64,
    options: BTreeMap<u64, OptionInfo>,
}

/// Capped option writer for one side. Calls take premium and pay out in A, puts in B.
pub struct SimOptions {
    address: Address,
    kind: OptionKind,
    settlement: Token,
    oracle: Arc<dyn PriceOracle>,
    clock: Arc<dyn Clock>,
    implied_volatility: f64,
    book: Mutex<Book>,
}

impl SimOptions {
    pub fn new(
        address: Address,
        kind: OptionKind,
        settlement: Token,
        oracle: Arc<dyn PriceOracle>,
        clock: Arc<dyn Clock>,
        implied_volatility: f64,
    ) -> Self {
        Self {
            address,
            kind,
            settlement,
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

    fn option(&self, id: u64) -> Result<OptionInfo, HedgeError> {
        self.book
            .lock()
            .options
            .get(&id)
            .copied()
            .ok_or(HedgeError::UnknownPosition(HedgeId(id)))
    }

    /// Payout value in raw B.
    fn payout_value(&self, amount: f64, strike: f64, price: f64, range: f64) -> f64 {
        match self.kind {
            OptionKind::Call => call_payout_value(amount, strike, price, range),
            OptionKind::Put => put_payout_value(amount, strike, price, range),
        }
    }

    /// Raw B value expressed in the settlement token.
    fn in_settlement(&self, value: f64, price: f64) -> f64 {
        match self.kind {
            OptionKind::Call => value / price,
            OptionKind::Put => value,
        }
    }

    fn price_cost(&self, strike: f64, amount: U256, range_bps: u64, period_secs: u64) -> U256 {
        let range = range_fraction(range_bps);
        let cap = raw_to_f64(amount) * strike * range;
        let value = premium(cap, self.implied_volatility, period_secs, range);
        f64_to_u256_ceil(self.in_settlement(value, strike))
    }
}

#[async_trait]
impl OptionsVenue for SimOptions {
    fn kind(&self) -> OptionKind {
        self.kind
    }

    fn settlement_token(&self) -> Token {
        self.settlement.clone()
    }

    async fn current_price(&self) -> Result<f64, HedgeError> {
        Ok(self.oracle.spot_price().await?)
    }

    async fn quote_cost(
        &self,
        amount: U256,
        range_bps: u64,
        period_secs: u64,
    ) -> Result<U256, HedgeError> {
        let strike = self.oracle.spot_price().await?;
        Ok(self.price_cost(strike, amount, range_bps, period_secs))
    }

    async fn buy(
        &self,
        payer: Address,
        amount: U256,
        range_bps: u64,
        period_secs: u64,
        max_cost: U256,
    ) -> Result<u64, HedgeError> {
        if amount.is_zero() || range_bps == 0 || period_secs == 0 {
            return Err(HedgeError::InvalidParameters(format!(
                "amount {amount}, range {range_bps} bps, period {period_secs}s"
            )));
        }
        let strike = self.oracle.spot_price().await?;
        let cost = self.price_cost(strike, amount, range_bps, period_secs);
        if cost > max_cost {
            return Err(HedgeError::BudgetExceeded {
                cost: raw_to_f64(cost),
                budget: raw_to_f64(max_cost),
            });
        }
        self.settlement.transfer(payer, self.address, cost)?;

        let now = self.clock.now();
        let mut book = self.book.lock();
        let id = book.next_id;
        book.next_id += 1;
        book.options.insert(
            id,
            OptionInfo {
                id,
                kind: self.kind,
                amount,
                strike,
                range_bps,
                opened_at: now,
                expiration: now + period_secs,
                cost,
                exercised: false,
            },
        );
        debug!(id, kind = ?self.kind, %amount, strike, %cost, "option written");
        Ok(id)
    }

    async fn current_payout(&self, id: u64) -> Result<U256, HedgeError> {
        let option = self.option(id)?;
        if option.exercised || self.clock.now() >= option.expiration {
            return Ok(U256::ZERO);
        }
        let price = self.oracle.spot_price().await?;
        let value = self.payout_value(
            raw_to_f64(option.amount),
            option.strike,
            price,
            range_fraction(option.range_bps),
        );
        Ok(f64_to_u256(self.in_settlement(value, price)))
    }

    async fn time_to_maturity(&self, id: u64) -> Result<u64, HedgeError> {
        let option = self.option(id)?;
        if option.exercised {
            return Ok(0);
        }
        Ok(option.expiration.saturating_sub(self.clock.now()))
    }

    async fn exercise(&self, id: u64, recipient: Address) -> Result<U256, HedgeError> {
        let payout = self.current_payout(id).await?;
        {
            let mut book = self.book.lock();
            match book.options.get_mut(&id) {
                Some(option) if !option.exercised => option.exercised = true,
                _ => return Ok(U256::ZERO),
            }
        }
        self.settlement.transfer(self.address, recipient, payout)?;
        debug!(id, kind = ?self.kind, %payout, "option exercised");
        Ok(payout)
    }

    async fn info(&self, id: u64) -> Result<OptionInfo, HedgeError> {
        self.option(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::il_payout;
    use crate::{DualOptionProvider, HedgeProvider, HedgeRequest};
    use clients_oracle::RelayOracle;
    use utils::ManualClock;

    const DAY: u64 = 86_400;

    struct Fixture {
        a: Token,
        b: Token,
        oracle: Arc<RelayOracle>,
        clock: Arc<ManualClock>,
        provider: DualOptionProvider,
        payer: Address,
    }

    fn fixture() -> Fixture {
        let a = Token::new(Address::with_last_byte(1), "WETH", 18);
        let b = Token::new(Address::with_last_byte(2), "DAI", 18);
        let oracle = Arc::new(RelayOracle::new(3.0));
        let clock = Arc::new(ManualClock::new(1_000_000));
        let call = Arc::new(SimOptions::new(
            Address::with_last_byte(0x71),
            OptionKind::Call,
            a.clone(),
            oracle.clone(),
            clock.clone(),
            0.8,
        ));
        let put = Arc::new(SimOptions::new(
            Address::with_last_byte(0x72),
            OptionKind::Put,
            b.clone(),
            oracle.clone(),
            clock.clone(),
            0.8,
        ));
        a.mint(call.address(), a.units(10_000)).unwrap();
        b.mint(put.address(), b.units(10_000)).unwrap();
        let payer = Address::with_last_byte(0x10);
        a.mint(payer, a.units(100)).unwrap();
        b.mint(payer, b.units(100)).unwrap();
        let provider = DualOptionProvider::new(call, put, a.clone(), b.clone()).unwrap();
        Fixture {
            a,
            b,
            oracle,
            clock,
            provider,
            payer,
        }
    }

    fn request(f: &Fixture) -> HedgeRequest {
        HedgeRequest {
            notional: f.a.units(1_000),
            range_bps: 2_000,
            period_secs: 7 * DAY,
            max_cost_value: raw_to_f64(f.b.units(200)),
        }
    }

    #[tokio::test]
    async fn costs_are_paid_in_both_assets() {
        let f = fixture();
        let id = f.provider.open(f.payer, &request(&f)).await.unwrap();
        let cost = f.provider.cost(id).await.unwrap();
        assert!(!cost.a.is_zero() && !cost.b.is_zero());
        assert_eq!(f.a.balance_of(f.payer), f.a.units(100) - cost.a);
        assert_eq!(f.b.balance_of(f.payer), f.b.units(100) - cost.b);
    }

    #[tokio::test]
    async fn put_leg_covers_loss_on_a_dump() {
        let f = fixture();
        let id = f.provider.open(f.payer, &request(&f)).await.unwrap();
        f.oracle.relay(2.7);
        f.clock.advance(DAY);
        let payout = f.provider.payout(id).await.unwrap();
        assert!(payout.a.is_zero());
        let loss = il_payout(raw_to_f64(f.a.units(1_000)), 3.0, 2.7, 0.2);
        assert!(raw_to_f64(payout.b) >= loss * 0.999);

        let settled = f.provider.close(id, f.payer).await.unwrap();
        assert_eq!(settled, payout);
        assert!(f.provider.close(id, f.payer).await.unwrap().is_zero());
        assert_eq!(f.provider.active(), None);
    }

    #[tokio::test]
    async fn call_leg_pays_in_a_on_a_pump() {
        let f = fixture();
        let id = f.provider.open(f.payer, &request(&f)).await.unwrap();
        f.oracle.relay(3.3);
        let payout = f.provider.payout(id).await.unwrap();
        assert!(!payout.a.is_zero() && payout.b.is_zero());
        let value = payout.value_in_b(3.3);
        let loss = il_payout(raw_to_f64(f.a.units(1_000)), 3.0, 3.3, 0.2);
        assert!(value >= loss * 0.999);
    }

    #[tokio::test]
    async fn underfunded_payer_buys_neither_leg() {
        let f = fixture();
        let poor = Address::with_last_byte(0x11);
        f.b.mint(poor, f.b.units(100)).unwrap();
        let err = f.provider.open(poor, &request(&f)).await.unwrap_err();
        assert!(matches!(err, HedgeError::Token(_)));
        assert_eq!(f.b.balance_of(poor), f.b.units(100));
        assert_eq!(f.provider.active(), None);
    }
}
