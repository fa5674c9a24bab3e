//! Concentrated-liquidity amount math, in token0/token1 orientation.
//!
//! `sqrt_*` arguments are square roots of raw token1 per raw token0.

/// Token amounts held by `liquidity` over `[sqrt_lower, sqrt_upper]` at `sqrt_price`.
pub fn amounts_for_liquidity(
    sqrt_price: f64,
    sqrt_lower: f64,
    sqrt_upper: f64,
    liquidity: f64,
) -> (f64, f64) {
    if liquidity <= 0.0 {
        return (0.0, 0.0);
    }
    if sqrt_price <= sqrt_lower {
        (liquidity * (1.0 / sqrt_lower - 1.0 / sqrt_upper), 0.0)
    } else if sqrt_price >= sqrt_upper {
        (0.0, liquidity * (sqrt_upper - sqrt_lower))
    } else {
        (
            liquidity * (1.0 / sqrt_price - 1.0 / sqrt_upper),
            liquidity * (sqrt_price - sqrt_lower),
        )
    }
}

/// Largest liquidity that `amount0`/`amount1` can fund over the range.
pub fn liquidity_for_amounts(
    sqrt_price: f64,
    sqrt_lower: f64,
    sqrt_upper: f64,
    amount0: f64,
    amount1: f64,
) -> f64 {
    if sqrt_price <= sqrt_lower {
        amount0 / (1.0 / sqrt_lower - 1.0 / sqrt_upper)
    } else if sqrt_price >= sqrt_upper {
        amount1 / (sqrt_upper - sqrt_lower)
    } else {
        let from0 = amount0 / (1.0 / sqrt_price - 1.0 / sqrt_upper);
        let from1 = amount1 / (sqrt_price - sqrt_lower);
        from0.min(from1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_range_is_all_token0() {
        let (a0, a1) = amounts_for_liquidity(0.9, 1.0, 1.1, 1_000.0);
        assert!(a0 > 0.0);
        assert_eq!(a1, 0.0);
    }

    #[test]
    fn above_range_is_all_token1() {
        let (a0, a1) = amounts_for_liquidity(1.2, 1.0, 1.1, 1_000.0);
        assert_eq!(a0, 0.0);
        assert!((a1 - 100.0).abs() < 1e-9);
    }

    #[test]
    fn liquidity_inverts_amounts() {
        let liquidity = 5_000.0;
        let (a0, a1) = amounts_for_liquidity(1.05, 1.0, 1.1, liquidity);
        let back = liquidity_for_amounts(1.05, 1.0, 1.1, a0, a1);
        assert!((back - liquidity).abs() < 1e-6);
    }
}
