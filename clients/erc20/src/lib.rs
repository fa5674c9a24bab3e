//! In-memory ERC20-style token ledger.
//!
//! Every venue simulation and the joint itself move value through [`Token`] handles, so
//! balances across the whole system are exact integer bookkeeping.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("insufficient {symbol} balance for {account}: {balance} < {required}")]
    InsufficientBalance {
        symbol: String,
        account: Address,
        balance: U256,
        required: U256,
    },

    #[error("{symbol} supply overflow")]
    Overflow { symbol: String },
}

#[derive(Debug, Default)]
struct Ledger {
    balances: HashMap<Address, U256>,
    total_supply: U256,
}

struct Inner {
    address: Address,
    symbol: String,
    decimals: u8,
    ledger: Mutex<Ledger>,
}

/// Cheaply clonable handle onto one token ledger.
#[derive(Clone)]
pub struct Token {
    inner: Arc<Inner>,
}

impl Token {
    pub fn new(address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            inner: Arc::new(Inner {
                address,
                symbol: symbol.into(),
                decimals,
                ledger: Mutex::new(Ledger::default()),
            }),
        }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub fn symbol(&self) -> &str {
        &self.inner.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.inner.decimals
    }

    /// Raw amount for `whole` tokens.
    pub fn units(&self, whole: u64) -> U256 {
        U256::from(whole) * U256::from(10u64).pow(U256::from(self.inner.decimals))
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.inner
            .ledger
            .lock()
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_supply(&self) -> U256 {
        self.inner.ledger.lock().total_supply
    }

    /// Moves `amount` from `from` to `to`. Fails without side effects when `from` is short.
    pub fn transfer(&self, from: Address, to: Address, amount: U256) -> Result<(), TokenError> {
        if amount.is_zero() || from == to {
            return Ok(());
        }
        let mut ledger = self.inner.ledger.lock();
        let balance = ledger.balances.get(&from).copied().unwrap_or_default();
        let remaining = balance
            .checked_sub(amount)
            .ok_or_else(|| TokenError::InsufficientBalance {
                symbol: self.inner.symbol.clone(),
                account: from,
                balance,
                required: amount,
            })?;
        ledger.balances.insert(from, remaining);
        let to_balance = ledger.balances.entry(to).or_default();
        *to_balance = to_balance.saturating_add(amount);
        trace!(token = %self.inner.symbol, %from, %to, %amount, "transfer");
        Ok(())
    }

    pub fn mint(&self, to: Address, amount: U256) -> Result<(), TokenError> {
        let mut ledger = self.inner.ledger.lock();
        ledger.total_supply =
            ledger
                .total_supply
                .checked_add(amount)
                .ok_or_else(|| TokenError::Overflow {
                    symbol: self.inner.symbol.clone(),
                })?;
        let balance = ledger.balances.entry(to).or_default();
        *balance = balance.saturating_add(amount);
        Ok(())
    }

    pub fn burn(&self, from: Address, amount: U256) -> Result<(), TokenError> {
        let mut ledger = self.inner.ledger.lock();
        let balance = ledger.balances.get(&from).copied().unwrap_or_default();
        let remaining = balance
            .checked_sub(amount)
            .ok_or_else(|| TokenError::InsufficientBalance {
                symbol: self.inner.symbol.clone(),
                account: from,
                balance,
                required: amount,
            })?;
        ledger.balances.insert(from, remaining);
        ledger.total_supply = ledger.total_supply.saturating_sub(amount);
        Ok(())
    }

    /// Moves the whole balance of `from` to `to` and returns the amount moved.
    pub fn sweep(&self, from: Address, to: Address) -> Result<U256, TokenError> {
        let amount = self.balance_of(from);
        self.transfer(from, to, amount)?;
        Ok(amount)
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.inner.address == other.inner.address
    }
}

impl Eq for Token {}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("address", &self.inner.address)
            .field("symbol", &self.inner.symbol)
            .field("decimals", &self.inner.decimals)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> Token {
        Token::new(Address::with_last_byte(1), "TKA", 18)
    }

    #[test]
    fn units_scale_by_decimals() {
        let usdc = Token::new(Address::with_last_byte(2), "USDC", 6);
        assert_eq!(usdc.units(3), U256::from(3_000_000u64));
    }

    #[test]
    fn transfer_moves_balance_and_keeps_supply() {
        let token = token();
        let alice = Address::with_last_byte(10);
        let bob = Address::with_last_byte(11);
        token.mint(alice, U256::from(100u64)).unwrap();
        token.transfer(alice, bob, U256::from(40u64)).unwrap();
        assert_eq!(token.balance_of(alice), U256::from(60u64));
        assert_eq!(token.balance_of(bob), U256::from(40u64));
        assert_eq!(token.total_supply(), U256::from(100u64));
    }

    #[test]
    fn short_transfer_fails_without_side_effects() {
        let token = token();
        let alice = Address::with_last_byte(10);
        token.mint(alice, U256::from(5u64)).unwrap();
        let err = token
            .transfer(alice, Address::with_last_byte(11), U256::from(6u64))
            .unwrap_err();
        assert!(matches!(err, TokenError::InsufficientBalance { .. }));
        assert_eq!(token.balance_of(alice), U256::from(5u64));
    }

    #[test]
    fn burn_and_sweep() {
        let token = token();
        let alice = Address::with_last_byte(10);
        let bob = Address::with_last_byte(11);
        token.mint(alice, U256::from(9u64)).unwrap();
        token.burn(alice, U256::from(4u64)).unwrap();
        assert_eq!(token.total_supply(), U256::from(5u64));
        assert_eq!(token.sweep(alice, bob).unwrap(), U256::from(5u64));
        assert!(token.balance_of(alice).is_zero());
    }

    #[test]
    fn clones_share_the_ledger() {
        let token = token();
        let handle = token.clone();
        handle.mint(Address::ZERO, U256::from(1u64)).unwrap();
        assert_eq!(token.total_supply(), U256::from(1u64));
        assert_eq!(token, handle);
    }
}
