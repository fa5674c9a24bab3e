//! Payout and premium formulas, in raw units.
//!
//! `notional` is raw A, prices are raw B per raw A, values are raw B. `range` is the
//! protection range as a fraction (0.15 for 15%).

pub const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 60.0 * 60.0;

pub fn range_fraction(range_bps: u64) -> f64 {
    range_bps as f64 / utils::BPS as f64
}

/// `price` clamped into `[strike * (1 - range), strike * (1 + range)]`.
pub fn clip_price(strike: f64, price: f64, range: f64) -> f64 {
    price.clamp(strike * (1.0 - range), strike * (1.0 + range))
}

/// Impermanent loss of a 50/50 position holding `notional` A, clipped to the range.
///
/// `q * (P + S - 2 * sqrt(P * S))`: zero at the strike and growing with the move.
pub fn il_payout(notional: f64, strike: f64, price: f64, range: f64) -> f64 {
    let p = clip_price(strike, price, range);
    (notional * (p + strike - 2.0 * (p * strike).sqrt())).max(0.0)
}

pub fn max_il_payout(notional: f64, strike: f64, range: f64) -> f64 {
    il_payout(notional, strike, strike * (1.0 + range), range)
        .max(il_payout(notional, strike, strike * (1.0 - range), range))
}

/// Call size whose capped payout at `S * (1 + range)` equals the loss there.
pub fn call_amount(notional: f64, range: f64) -> f64 {
    notional * (2.0 + range - 2.0 * (1.0 + range).sqrt()) / range
}

/// Put size whose capped payout at `S * (1 - range)` equals the loss there.
pub fn put_amount(notional: f64, range: f64) -> f64 {
    notional * (2.0 - range - 2.0 * (1.0 - range).sqrt()) / range
}

/// Value of a call spread struck at `strike` and capped at `strike * (1 + range)`.
pub fn call_payout_value(amount: f64, strike: f64, price: f64, range: f64) -> f64 {
    amount * (clip_price(strike, price, range) - strike).max(0.0)
}

/// Value of a put spread struck at `strike` and floored at `strike * (1 - range)`.
pub fn put_payout_value(amount: f64, strike: f64, price: f64, range: f64) -> f64 {
    amount * (strike - clip_price(strike, price, range)).max(0.0)
}

/// Simulated premium: the capped payout scaled by the expected move over the period.
pub fn premium(max_payout_value: f64, implied_volatility: f64, period_secs: u64, range: f64) -> f64 {
    if range <= 0.0 {
        return 0.0;
    }
    let expected_move = implied_volatility * (period_secs as f64 / SECONDS_PER_YEAR).sqrt();
    max_payout_value * (expected_move / range).min(1.0)
}
