//! Shared utilities for the joint workspace.
//!
//! Amounts are raw token base units held in `U256`; prices are `f64` quotes of raw
//! B units per raw A unit.

pub mod clock;
pub mod tick;

use std::fmt;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

pub use clock::{Clock, ManualClock, SystemClock};

/// Basis-point denominator.
pub const BPS: u64 = 10_000;

/// Converts a U256 value to f64, accounting for token decimals.
///
/// Values larger than `u128::MAX` are truncated; this is acceptable for f64 precision.
pub fn u256_to_f64(value: U256, decimals: u32) -> f64 {
    let value_u128 = u128::try_from(value).unwrap_or(u128::MAX);
    let divisor = 10_u128.pow(decimals);
    let whole_part = value_u128 / divisor;
    let fractional_part = value_u128 % divisor;
    whole_part as f64 + (fractional_part as f64 / divisor as f64)
}

/// Raw amount as f64, without any decimal scaling.
pub fn raw_to_f64(value: U256) -> f64 {
    u128::try_from(value).unwrap_or(u128::MAX) as f64
}

/// Floors a non-negative f64 into a raw amount. NaN and negatives map to zero.
pub fn f64_to_u256(value: f64) -> U256 {
    if value.is_nan() || value <= 0.0 {
        U256::ZERO
    } else if value >= u128::MAX as f64 {
        U256::from(u128::MAX)
    } else {
        U256::from(value.floor() as u128)
    }
}

/// Ceils a non-negative f64 into a raw amount.
pub fn f64_to_u256_ceil(value: f64) -> U256 {
    f64_to_u256(value.ceil())
}

/// `a * b / denominator`, `None` on overflow or a zero denominator.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    a.checked_mul(b).map(|product| product / denominator)
}

/// Applies a basis-point ratio to an amount, rounding down.
pub fn apply_bps(amount: U256, bps: u64) -> U256 {
    mul_div(amount, U256::from(bps), U256::from(BPS)).unwrap_or(U256::MAX)
}

/// Raw amount that remains after taking `bps` of slippage off `amount`.
pub fn min_out(amount: U256, slippage_bps: u64) -> U256 {
    apply_bps(amount, BPS.saturating_sub(slippage_bps))
}

/// Converts a human price (whole B per whole A) into the raw base-unit ratio.
pub fn human_to_raw_price(price: f64, decimals_a: u8, decimals_b: u8) -> f64 {
    price * 10f64.powi(decimals_b as i32 - decimals_a as i32)
}

/// Converts a raw base-unit ratio back into a human price.
pub fn raw_to_human_price(price: f64, decimals_a: u8, decimals_b: u8) -> f64 {
    price * 10f64.powi(decimals_a as i32 - decimals_b as i32)
}

/// Relative distance between two prices in basis points, rounded up so any move past a
/// limit reads as past it.
pub fn deviation_bps(reference: f64, observed: f64) -> u64 {
    if reference <= 0.0 {
        return u64::MAX;
    }
    let bps = (observed / reference - 1.0).abs() * BPS as f64;
    // float noise on an exact boundary must not round it up
    (bps - 1e-6).ceil().max(0.0) as u64
}

/// A pair of raw amounts, one per side of the joint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairAmounts {
    /// Amount of asset A
    pub a: U256,
    /// Amount of asset B
    pub b: U256,
}

impl PairAmounts {
    pub const ZERO: Self = Self {
        a: U256::ZERO,
        b: U256::ZERO,
    };

    pub fn new(a: U256, b: U256) -> Self {
        Self { a, b }
    }

    pub fn is_zero(&self) -> bool {
        self.a.is_zero() && self.b.is_zero()
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self {
            a: self.a.saturating_add(other.a),
            b: self.b.saturating_add(other.b),
        }
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self {
            a: self.a.saturating_sub(other.a),
            b: self.b.saturating_sub(other.b),
        }
    }

    /// `None` when either side would underflow.
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        Some(Self {
            a: self.a.checked_sub(other.a)?,
            b: self.b.checked_sub(other.b)?,
        })
    }

    /// Value of both sides in raw B units at `price`.
    pub fn value_in_b(&self, price: f64) -> f64 {
        raw_to_f64(self.a) * price + raw_to_f64(self.b)
    }

    /// Swaps sides, for venues that order the pair the other way round.
    pub fn flipped(self) -> Self {
        Self {
            a: self.b,
            b: self.a,
        }
    }
}

impl fmt::Display for PairAmounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(a: {}, b: {})", self.a, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_to_f64_scales_by_decimals() {
        let value = U256::from(1_500_000u64);
        assert_eq!(u256_to_f64(value, 6), 1.5);
    }

    #[test]
    fn f64_conversion_floors_and_clamps() {
        assert_eq!(f64_to_u256(10.9), U256::from(10u64));
        assert_eq!(f64_to_u256(-3.0), U256::ZERO);
        assert_eq!(f64_to_u256(f64::NAN), U256::ZERO);
        assert_eq!(f64_to_u256_ceil(10.1), U256::from(11u64));
    }

    #[test]
    fn bps_helpers() {
        let amount = U256::from(1_000_000u64);
        assert_eq!(apply_bps(amount, 50), U256::from(5_000u64));
        assert_eq!(min_out(amount, 100), U256::from(990_000u64));
        assert_eq!(mul_div(amount, U256::from(3u64), U256::ZERO), None);
    }

    #[test]
    fn price_scaling_round_trips() {
        let raw = human_to_raw_price(0.5, 18, 6);
        assert!((raw - 5e-13).abs() < 1e-25);
        assert!((raw_to_human_price(raw, 18, 6) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn deviation_is_symmetric_in_magnitude() {
        assert_eq!(deviation_bps(100.0, 115.0), 1500);
        assert_eq!(deviation_bps(100.0, 85.0), 1500);
        assert_eq!(deviation_bps(0.0, 1.0), u64::MAX);
        assert_eq!(deviation_bps(1.0, 1.0), 0);
    }

    #[test]
    fn deviation_past_a_limit_rounds_up() {
        assert_eq!(deviation_bps(1.0, 0.84996), 1501);
        assert_eq!(deviation_bps(100.0, 115.004), 1501);
        assert_eq!(deviation_bps(100.0, 85.0), 1500);
    }

    #[test]
    fn pair_amounts_arithmetic() {
        let x = PairAmounts::new(U256::from(5u64), U256::from(7u64));
        let y = PairAmounts::new(U256::from(2u64), U256::from(9u64));
        assert_eq!(x.saturating_sub(y), PairAmounts::new(U256::from(3u64), U256::ZERO));
        assert_eq!(x.checked_sub(y), None);
        assert_eq!(x.saturating_add(y).b, U256::from(16u64));
        assert_eq!(x.flipped().a, U256::from(7u64));
        assert_eq!(x.value_in_b(2.0), 17.0);
    }
}
