use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::Token;
use parking_lot::Mutex;
use tracing::debug;
use utils::{mul_div, raw_to_f64, BPS};

use crate::{AmmError, ConstantProductVenue, SwapVenue};

/// Liquidity locked forever on the first deposit.
pub const MINIMUM_LIQUIDITY: u64 = 1_000;

/// `x * y = k` pair with a router-style optimal deposit.
pub struct ConstantProductPair {
    address: Address,
    token0: Token,
    token1: Token,
    lp: Token,
    fee_bps: u64,
    lock: Mutex<()>,
}

impl ConstantProductPair {
    /// Tokens are ordered by address, as on-chain pairs do.
    pub fn new(address: Address, token_x: Token, token_y: Token, fee_bps: u64) -> Self {
        let (token0, token1) = if token_x.address() < token_y.address() {
            (token_x, token_y)
        } else {
            (token_y, token_x)
        };
        let lp = Token::new(
            address,
            format!("{}-{} LP", token0.symbol(), token1.symbol()),
            18,
        );
        Self {
            address,
            token0,
            token1,
            lp,
            fee_bps,
            lock: Mutex::new(()),
        }
    }

    fn balances(&self) -> (U256, U256) {
        (
            self.token0.balance_of(self.address),
            self.token1.balance_of(self.address),
        )
    }

    /// `(token_in, token_out, reserve_in, reserve_out)`
    fn orient(&self, token_in: Address) -> Result<(&Token, &Token, U256, U256), AmmError> {
        let (r0, r1) = self.balances();
        if token_in == self.token0.address() {
            Ok((&self.token0, &self.token1, r0, r1))
        } else if token_in == self.token1.address() {
            Ok((&self.token1, &self.token0, r1, r0))
        } else {
            Err(AmmError::UnknownToken(token_in))
        }
    }

    fn amount_out(&self, amount_in: U256, reserve_in: U256, reserve_out: U256) -> U256 {
        if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
            return U256::ZERO;
        }
        let in_with_fee = amount_in * U256::from(BPS - self.fee_bps);
        let numerator = in_with_fee * reserve_out;
        let denominator = reserve_in * U256::from(BPS) + in_with_fee;
        numerator / denominator
    }
}

#[async_trait]
impl SwapVenue for ConstantProductPair {
    fn address(&self) -> Address {
        self.address
    }

    fn tokens(&self) -> (Token, Token) {
        (self.token0.clone(), self.token1.clone())
    }

    async fn spot_price(&self, base: Address) -> Result<f64, AmmError> {
        let (_, _, reserve_base, reserve_other) = self.orient(base)?;
        if reserve_base.is_zero() {
            return Err(AmmError::InsufficientLiquidity);
        }
        Ok(raw_to_f64(reserve_other) / raw_to_f64(reserve_base))
    }

    async fn quote_exact_in(&self, token_in: Address, amount_in: U256) -> Result<U256, AmmError> {
        let (_, _, reserve_in, reserve_out) = self.orient(token_in)?;
        Ok(self.amount_out(amount_in, reserve_in, reserve_out))
    }

    async fn quote_exact_out(
        &self,
        token_in: Address,
        amount_out: U256,
    ) -> Result<U256, AmmError> {
        let (_, _, reserve_in, reserve_out) = self.orient(token_in)?;
        if amount_out >= reserve_out {
            return Err(AmmError::InsufficientLiquidity);
        }
        let numerator = reserve_in * amount_out * U256::from(BPS);
        let denominator = (reserve_out - amount_out) * U256::from(BPS - self.fee_bps);
        Ok(numerator / denominator + U256::from(1u64))
    }

    async fn swap_exact_in(
        &self,
        trader: Address,
        token_in: Address,
        amount_in: U256,
        min_out: U256,
    ) -> Result<U256, AmmError> {
        let _guard = self.lock.lock();
        let (input, output, reserve_in, reserve_out) = self.orient(token_in)?;
        let amount_out = self.amount_out(amount_in, reserve_in, reserve_out);
        if amount_out < min_out {
            return Err(AmmError::SlippageExceeded {
                received: amount_out,
                minimum: min_out,
            });
        }
        input.transfer(trader, self.address, amount_in)?;
        output.transfer(self.address, trader, amount_out)?;
        debug!(pair = %self.address, token_in = input.symbol(), %amount_in, %amount_out, "swap");
        Ok(amount_out)
    }
}

#[async_trait]
impl ConstantProductVenue for ConstantProductPair {
    fn lp_token(&self) -> Token {
        self.lp.clone()
    }

    async fn reserves(&self) -> Result<(U256, U256), AmmError> {
        Ok(self.balances())
    }

    async fn add_liquidity(
        &self,
        provider: Address,
        desired: (U256, U256),
        minimum: (U256, U256),
    ) -> Result<(U256, U256, U256), AmmError> {
        let _guard = self.lock.lock();
        let (r0, r1) = self.balances();
        let (used0, used1) = if r0.is_zero() && r1.is_zero() {
            desired
        } else {
            let optimal1 =
                mul_div(desired.0, r1, r0).ok_or(AmmError::InsufficientLiquidity)?;
            if optimal1 <= desired.1 {
                if optimal1 < minimum.1 {
                    return Err(AmmError::SlippageExceeded {
                        received: optimal1,
                        minimum: minimum.1,
                    });
                }
                (desired.0, optimal1)
            } else {
                let optimal0 =
                    mul_div(desired.1, r0, r1).ok_or(AmmError::InsufficientLiquidity)?;
                if optimal0 < minimum.0 {
                    return Err(AmmError::SlippageExceeded {
                        received: optimal0,
                        minimum: minimum.0,
                    });
                }
                (optimal0, desired.1)
            }
        };
        if used0.is_zero() || used1.is_zero() {
            return Err(AmmError::ZeroAmount);
        }

        let supply = self.lp.total_supply();
        let liquidity = if supply.is_zero() {
            let root = (used0 * used1).root(2);
            root.checked_sub(U256::from(MINIMUM_LIQUIDITY))
                .filter(|l| !l.is_zero())
                .ok_or(AmmError::InsufficientLiquidity)?
        } else {
            let from0 = used0 * supply / r0;
            let from1 = used1 * supply / r1;
            from0.min(from1)
        };
        if liquidity.is_zero() {
            return Err(AmmError::InsufficientLiquidity);
        }

        // both legs must be fundable before either moves
        for (token, amount) in [(&self.token0, used0), (&self.token1, used1)] {
            let balance = token.balance_of(provider);
            if balance < amount {
                return Err(clients_erc20::TokenError::InsufficientBalance {
                    symbol: token.symbol().to_string(),
                    account: provider,
                    balance,
                    required: amount,
                }
                .into());
            }
        }
        self.token0.transfer(provider, self.address, used0)?;
        self.token1.transfer(provider, self.address, used1)?;
        if supply.is_zero() {
            self.lp.mint(Address::ZERO, U256::from(MINIMUM_LIQUIDITY))?;
        }
        self.lp.mint(provider, liquidity)?;
        debug!(pair = %self.address, %used0, %used1, %liquidity, "add liquidity");
        Ok((used0, used1, liquidity))
    }

    async fn remove_liquidity(
        &self,
        provider: Address,
        liquidity: U256,
        minimum: (U256, U256),
    ) -> Result<(U256, U256), AmmError> {
        let _guard = self.lock.lock();
        if liquidity.is_zero() {
            return Ok((U256::ZERO, U256::ZERO));
        }
        let supply = self.lp.total_supply();
        let (r0, r1) = self.balances();
        let amount0 = mul_div(liquidity, r0, supply).ok_or(AmmError::InsufficientLiquidity)?;
        let amount1 = mul_div(liquidity, r1, supply).ok_or(AmmError::InsufficientLiquidity)?;
        if amount0 < minimum.0 {
            return Err(AmmError::SlippageExceeded {
                received: amount0,
                minimum: minimum.0,
            });
        }
        if amount1 < minimum.1 {
            return Err(AmmError::SlippageExceeded {
                received: amount1,
                minimum: minimum.1,
            });
        }
        self.lp.burn(provider, liquidity)?;
        self.token0.transfer(self.address, provider, amount0)?;
        self.token1.transfer(self.address, provider, amount1)?;
        debug!(pair = %self.address, %amount0, %amount1, %liquidity, "remove liquidity");
        Ok((amount0, amount1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (ConstantProductPair, Token, Token, Address) {
        let a = Token::new(Address::with_last_byte(1), "A", 18);
        let b = Token::new(Address::with_last_byte(2), "B", 18);
        let pair = ConstantProductPair::new(Address::with_last_byte(0x50), a.clone(), b.clone(), 30);
        let lp = Address::with_last_byte(0x60);
        a.mint(lp, U256::from(1_000_000u64)).unwrap();
        b.mint(lp, U256::from(4_000_000u64)).unwrap();
        (pair, a, b, lp)
    }

    #[tokio::test]
    async fn first_deposit_locks_minimum_liquidity() {
        let (pair, _, _, lp) = setup();
        let (_, _, liquidity) = pair
            .add_liquidity(lp, (U256::from(1_000_000u64), U256::from(4_000_000u64)), (U256::ZERO, U256::ZERO))
            .await
            .unwrap();
        assert_eq!(liquidity, U256::from(2_000_000u64 - MINIMUM_LIQUIDITY));
        assert_eq!(pair.lp_token().balance_of(Address::ZERO), U256::from(MINIMUM_LIQUIDITY));
        assert_eq!(pair.spot_price(Address::with_last_byte(1)).await.unwrap(), 4.0);
    }

    #[tokio::test]
    async fn second_deposit_uses_pool_ratio() {
        let (pair, a, b, lp) = setup();
        pair.add_liquidity(lp, (U256::from(500_000u64), U256::from(2_000_000u64)), (U256::ZERO, U256::ZERO))
            .await
            .unwrap();
        let (used0, used1, _) = pair
            .add_liquidity(lp, (U256::from(100_000u64), U256::from(1_000_000u64)), (U256::ZERO, U256::ZERO))
            .await
            .unwrap();
        assert_eq!((used0, used1), (U256::from(100_000u64), U256::from(400_000u64)));
        assert_eq!(a.balance_of(pair.address()), U256::from(600_000u64));
        assert_eq!(b.balance_of(pair.address()), U256::from(2_400_000u64));
    }

    #[tokio::test]
    async fn swap_respects_min_out() {
        let (pair, a, b, lp) = setup();
        pair.add_liquidity(lp, (U256::from(500_000u64), U256::from(2_000_000u64)), (U256::ZERO, U256::ZERO))
            .await
            .unwrap();
        let quoted = pair.quote_exact_in(a.address(), U256::from(10_000u64)).await.unwrap();
        let err = pair
            .swap_exact_in(lp, a.address(), U256::from(10_000u64), quoted + U256::from(1u64))
            .await
            .unwrap_err();
        assert!(matches!(err, AmmError::SlippageExceeded { .. }));

        let before = b.balance_of(lp);
        let out = pair.swap_exact_in(lp, a.address(), U256::from(10_000u64), quoted).await.unwrap();
        assert_eq!(out, quoted);
        assert_eq!(b.balance_of(lp) - before, quoted);
    }

    #[tokio::test]
    async fn exact_out_quote_buys_at_least_the_amount() {
        let (pair, a, _, lp) = setup();
        pair.add_liquidity(lp, (U256::from(500_000u64), U256::from(2_000_000u64)), (U256::ZERO, U256::ZERO))
            .await
            .unwrap();
        let wanted = U256::from(40_000u64);
        let needed = pair.quote_exact_out(a.address(), wanted).await.unwrap();
        assert!(pair.quote_exact_in(a.address(), needed).await.unwrap() >= wanted);
        let err = pair
            .swap_exact_out(lp, a.address(), wanted, needed - U256::from(1u64))
            .await
            .unwrap_err();
        assert!(matches!(err, AmmError::ExcessiveInput { .. }));
    }

    #[tokio::test]
    async fn remove_returns_pro_rata() {
        let (pair, a, b, lp) = setup();
        let (_, _, liquidity) = pair
            .add_liquidity(lp, (U256::from(1_000_000u64), U256::from(4_000_000u64)), (U256::ZERO, U256::ZERO))
            .await
            .unwrap();
        let half = liquidity / U256::from(2u64);
        let (out0, out1) = pair.remove_liquidity(lp, half, (U256::ZERO, U256::ZERO)).await.unwrap();
        assert_eq!(a.balance_of(lp), out0);
        assert_eq!(b.balance_of(lp), out1);
        assert!(out1 == out0 * U256::from(4u64));
    }
}
