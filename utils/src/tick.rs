//! Tick arithmetic for concentrated-liquidity ranges.
//!
//! A tick `t` quotes `1.0001^t` raw token1 per raw token0.

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

const TICK_BASE: f64 = 1.0001;

pub fn price_at_tick(tick: i32) -> f64 {
    TICK_BASE.powi(tick)
}

pub fn sqrt_price_at_tick(tick: i32) -> f64 {
    TICK_BASE.powf(tick as f64 / 2.0)
}

/// Greatest tick whose price is not above `price`.
pub fn tick_at_price(price: f64) -> i32 {
    // nudge so exact tick prices do not floor one below through rounding
    let raw = price.ln() / TICK_BASE.ln();
    ((raw + 1e-9).floor() as i32).clamp(MIN_TICK, MAX_TICK)
}

pub fn tick_at_sqrt_price(sqrt_price: f64) -> i32 {
    tick_at_price(sqrt_price * sqrt_price)
}

/// Rounds a tick down onto the spacing grid.
pub fn floor_to_spacing(tick: i32, spacing: i32) -> i32 {
    tick.div_euclid(spacing) * spacing
}

/// Window of `(2 * ticks_from_current + 1) * spacing` ticks holding `current`.
pub fn window_around(current: i32, ticks_from_current: i32, spacing: i32) -> (i32, i32) {
    let base = floor_to_spacing(current, spacing);
    let lower = base - ticks_from_current * spacing;
    let upper = base + (ticks_from_current + 1) * spacing;
    (lower.max(MIN_TICK), upper.min(MAX_TICK))
}
