use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::Token;
use parking_lot::Mutex;
use tracing::debug;
use utils::{f64_to_u256, raw_to_f64, BPS};

use crate::{AmmError, SwapVenue};

const NEWTON_ITERATIONS: usize = 255;

/// Two-coin stable-swap pool, the low-slippage alternative route.
///
/// Balances are normalised to 18 decimals before the invariant is solved.
pub struct StablePool {
    address: Address,
    token0: Token,
    token1: Token,
    amplification: f64,
    fee_bps: u64,
    lock: Mutex<()>,
}

impl StablePool {
    pub fn new(address: Address, token_x: Token, token_y: Token, amplification: f64, fee_bps: u64) -> Self {
        let (token0, token1) = if token_x.address() < token_y.address() {
            (token_x, token_y)
        } else {
            (token_y, token_x)
        };
        Self {
            address,
            token0,
            token1,
            amplification,
            fee_bps,
            lock: Mutex::new(()),
        }
    }

    /// Moves liquidity from `provider` into the pool.
    pub fn seed(&self, provider: Address, amount0: U256, amount1: U256) -> Result<(), AmmError> {
        let _guard = self.lock.lock();
        self.token0.transfer(provider, self.address, amount0)?;
        self.token1.transfer(provider, self.address, amount1)?;
        Ok(())
    }

    fn rate(token: &Token) -> f64 {
        10f64.powi(18 - token.decimals() as i32)
    }

    fn orient(&self, token_in: Address) -> Result<(&Token, &Token), AmmError> {
        if token_in == self.token0.address() {
            Ok((&self.token0, &self.token1))
        } else if token_in == self.token1.address() {
            Ok((&self.token1, &self.token0))
        } else {
            Err(AmmError::UnknownToken(token_in))
        }
    }

    fn invariant(&self, x: f64, y: f64) -> f64 {
        let sum = x + y;
        if sum == 0.0 {
            return 0.0;
        }
        let ann = self.amplification * 4.0;
        let mut d = sum;
        for _ in 0..NEWTON_ITERATIONS {
            let d_p = d * d / (2.0 * x) * d / (2.0 * y);
            let prev = d;
            d = (ann * sum + 2.0 * d_p) * d / ((ann - 1.0) * d + 3.0 * d_p);
            if (d - prev).abs() <= d * 1e-15 {
                break;
            }
        }
        d
    }

    fn solve_y(&self, x: f64, d: f64) -> f64 {
        let ann = self.amplification * 4.0;
        let c = d * d / (2.0 * x) * d / (2.0 * ann);
        let b = x + d / ann;
        let mut y = d;
        for _ in 0..NEWTON_ITERATIONS {
            let prev = y;
            y = (y * y + c) / (2.0 * y + b - d);
            if (y - prev).abs() <= y * 1e-15 {
                break;
            }
        }
        y
    }

    fn amount_out(&self, token_in: &Token, token_out: &Token, amount_in: U256) -> U256 {
        let (rate_in, rate_out) = (Self::rate(token_in), Self::rate(token_out));
        let x = raw_to_f64(token_in.balance_of(self.address)) * rate_in;
        let y = raw_to_f64(token_out.balance_of(self.address)) * rate_out;
        if x <= 0.0 || y <= 0.0 || amount_in.is_zero() {
            return U256::ZERO;
        }
        let d = self.invariant(x, y);
        let y_new = self.solve_y(x + raw_to_f64(amount_in) * rate_in, d);
        let dy = (y - y_new).max(0.0);
        let fee = dy * self.fee_bps as f64 / BPS as f64;
        f64_to_u256((dy - fee) / rate_out)
    }
}

#[async_trait]
impl SwapVenue for StablePool {
    fn address(&self) -> Address {
        self.address
    }

    fn tokens(&self) -> (Token, Token) {
        (self.token0.clone(), self.token1.clone())
    }

    async fn spot_price(&self, base: Address) -> Result<f64, AmmError> {
        let (token_in, token_out) = self.orient(base)?;
        let balance = token_in.balance_of(self.address);
        if balance.is_zero() {
            return Err(AmmError::InsufficientLiquidity);
        }
        let sample = (balance / U256::from(1_000_000u64)).max(U256::from(1u64));
        let out = self.amount_out(token_in, token_out, sample);
        let gross = raw_to_f64(out) / (1.0 - self.fee_bps as f64 / BPS as f64);
        Ok(gross / raw_to_f64(sample))
    }

    async fn quote_exact_in(&self, token_in: Address, amount_in: U256) -> Result<U256, AmmError> {
        let (input, output) = self.orient(token_in)?;
        Ok(self.amount_out(input, output, amount_in))
    }

    async fn swap_exact_in(
        &self,
        trader: Address,
        token_in: Address,
        amount_in: U256,
        min_out: U256,
    ) -> Result<U256, AmmError> {
        let _guard = self.lock.lock();
        let (input, output) = self.orient(token_in)?;
        let amount_out = self.amount_out(input, output, amount_in);
        if amount_out < min_out {
            return Err(AmmError::SlippageExceeded {
                received: amount_out,
                minimum: min_out,
            });
        }
        input.transfer(trader, self.address, amount_in)?;
        output.transfer(self.address, trader, amount_out)?;
        debug!(pool = %self.address, token_in = input.symbol(), %amount_in, %amount_out, "stable swap");
        Ok(amount_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn balanced_pool_swaps_near_par() {
        let usdc = Token::new(Address::with_last_byte(1), "USDC", 6);
        let dai = Token::new(Address::with_last_byte(2), "DAI", 18);
        let pool = StablePool::new(Address::with_last_byte(0x80), usdc.clone(), dai.clone(), 200.0, 4);
        let lp = Address::with_last_byte(0x10);
        usdc.mint(lp, usdc.units(2_000_000)).unwrap();
        dai.mint(lp, dai.units(1_000_000)).unwrap();
        pool.seed(lp, usdc.units(1_000_000), dai.units(1_000_000)).unwrap();

        let out = pool
            .swap_exact_in(lp, usdc.address(), usdc.units(10_000), U256::ZERO)
            .await
            .unwrap();
        let out_whole = utils::u256_to_f64(out, 18);
        assert!(out_whole > 9_990.0 && out_whole < 10_000.0, "{out_whole}");

        let price = pool.spot_price(usdc.address()).await.unwrap();
        assert!((price / 1e12 - 1.0).abs() < 0.01);
    }
}
