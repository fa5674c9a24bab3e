use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use clients_erc20::Token;
use parking_lot::Mutex;
use tracing::{debug, info};
use utils::{mul_div, Clock, BPS};

use crate::{StrategyParams, Vault, VaultError};

#[derive(Debug, Default)]
struct Books {
    debt_ratio: u64,
    total_debt: U256,
    strategies: HashMap<Address, StrategyParams>,
}

/// Single-asset vault with yearn-v2 debt accounting and no share tokens.
pub struct SimVault {
    address: Address,
    token: Token,
    clock: Arc<dyn Clock>,
    books: Mutex<Books>,
}

impl SimVault {
    pub fn new(address: Address, token: Token, clock: Arc<dyn Clock>) -> Self {
        Self {
            address,
            token,
            clock,
            books: Mutex::new(Books::default()),
        }
    }

    pub fn deposit(&self, depositor: Address, amount: U256) -> Result<(), VaultError> {
        self.token.transfer(depositor, self.address, amount)?;
        debug!(%depositor, %amount, "vault deposit");
        Ok(())
    }

    pub fn add_strategy(
        &self,
        strategy: Address,
        debt_ratio: u64,
        max_debt_per_harvest: U256,
    ) -> Result<(), VaultError> {
        let mut books = self.books.lock();
        if books.strategies.contains_key(&strategy) {
            return Err(VaultError::DuplicateStrategy(strategy));
        }
        let total = books.debt_ratio + debt_ratio;
        if total > BPS {
            return Err(VaultError::DebtRatioOverflow { total });
        }
        books.debt_ratio = total;
        books.strategies.insert(
            strategy,
            StrategyParams {
                debt_ratio,
                max_debt_per_harvest,
                last_report: self.clock.now(),
                ..StrategyParams::default()
            },
        );
        info!(%strategy, debt_ratio, "strategy added");
        Ok(())
    }

    pub fn idle(&self) -> U256 {
        self.token.balance_of(self.address)
    }

    pub fn total_assets(&self) -> U256 {
        self.idle() + self.books.lock().total_debt
    }

    fn params(books: &Books, strategy: Address) -> Result<StrategyParams, VaultError> {
        books
            .strategies
            .get(&strategy)
            .copied()
            .ok_or(VaultError::UnknownStrategy(strategy))
    }

    fn limit(total_assets: U256, debt_ratio: u64) -> U256 {
        mul_div(total_assets, U256::from(debt_ratio), U256::from(BPS)).unwrap_or(U256::MAX)
    }

    fn outstanding(&self, books: &Books, params: &StrategyParams) -> U256 {
        if params.debt_ratio == 0 {
            return params.total_debt;
        }
        let limit = Self::limit(self.idle() + books.total_debt, params.debt_ratio);
        params.total_debt.saturating_sub(limit)
    }

    fn credit(&self, books: &Books, params: &StrategyParams) -> U256 {
        let idle = self.idle();
        let total_assets = idle + books.total_debt;
        let vault_limit = Self::limit(total_assets, books.debt_ratio);
        let strategy_limit = Self::limit(total_assets, params.debt_ratio);
        if params.total_debt >= strategy_limit || books.total_debt >= vault_limit {
            return U256::ZERO;
        }
        (strategy_limit - params.total_debt)
            .min(vault_limit - books.total_debt)
            .min(idle)
            .min(params.max_debt_per_harvest)
    }
}

#[async_trait]
impl Vault for SimVault {
    fn address(&self) -> Address {
        self.address
    }

    fn token(&self) -> Token {
        self.token.clone()
    }

    async fn report(
        &self,
        strategy: Address,
        gain: U256,
        loss: U256,
        debt_payment: U256,
    ) -> Result<U256, VaultError> {
        let mut books = self.books.lock();
        let mut params = Self::params(&books, strategy)?;
        let owed_in = gain + debt_payment;
        let held = self.token.balance_of(strategy);
        if held < owed_in {
            return Err(clients_erc20::TokenError::InsufficientBalance {
                symbol: self.token.symbol().to_string(),
                account: strategy,
                balance: held,
                required: owed_in,
            }
            .into());
        }

        if !loss.is_zero() {
            if loss > params.total_debt {
                return Err(VaultError::LossExceedsDebt {
                    loss,
                    debt: params.total_debt,
                });
            }
            // a loss shrinks the strategy's share of the vault
            if !books.total_debt.is_zero() {
                let change = mul_div(loss, U256::from(books.debt_ratio), books.total_debt)
                    .unwrap_or(U256::MAX)
                    .min(U256::from(params.debt_ratio))
                    .to::<u64>();
                params.debt_ratio -= change;
                books.debt_ratio -= change;
            }
            params.total_loss += loss;
            params.total_debt -= loss;
            books.total_debt -= loss;
        }
        params.total_gain += gain;

        let paid_back = debt_payment.min(self.outstanding(&books, &params));
        if !paid_back.is_zero() {
            params.total_debt -= paid_back;
            books.total_debt -= paid_back;
        }

        let credit = self.credit(&books, &params);
        if !credit.is_zero() {
            params.total_debt += credit;
            books.total_debt += credit;
        }

        let returned = gain + paid_back;
        if returned < credit {
            self.token.transfer(self.address, strategy, credit - returned)?;
        } else if returned > credit {
            self.token.transfer(strategy, self.address, returned - credit)?;
        }

        params.last_report = self.clock.now();
        books.strategies.insert(strategy, params);
        let outstanding = self.outstanding(&books, &params);
        info!(
            %strategy,
            %gain,
            %loss,
            debt_payment = %paid_back,
            %credit,
            debt = %params.total_debt,
            "strategy reported"
        );
        Ok(outstanding)
    }

    async fn update_debt_ratio(&self, strategy: Address, debt_ratio: u64) -> Result<(), VaultError> {
        let mut books = self.books.lock();
        let mut params = Self::params(&books, strategy)?;
        let total = books.debt_ratio - params.debt_ratio + debt_ratio;
        if total > BPS {
            return Err(VaultError::DebtRatioOverflow { total });
        }
        books.debt_ratio = total;
        params.debt_ratio = debt_ratio;
        books.strategies.insert(strategy, params);
        info!(%strategy, debt_ratio, "debt ratio updated");
        Ok(())
    }

    async fn migrate_strategy(&self, old: Address, new: Address) -> Result<(), VaultError> {
        let mut books = self.books.lock();
        let previous = Self::params(&books, old)?;
        if books.strategies.contains_key(&new) {
            return Err(VaultError::DuplicateStrategy(new));
        }
        books.strategies.insert(
            new,
            StrategyParams {
                total_gain: U256::ZERO,
                total_loss: U256::ZERO,
                ..previous
            },
        );
        books.strategies.insert(
            old,
            StrategyParams {
                debt_ratio: 0,
                total_debt: U256::ZERO,
                ..previous
            },
        );
        info!(%old, %new, debt = %previous.total_debt, "strategy migrated");
        Ok(())
    }

    async fn debt(&self, strategy: Address) -> Result<U256, VaultError> {
        Ok(Self::params(&self.books.lock(), strategy)?.total_debt)
    }

    async fn debt_outstanding(&self, strategy: Address) -> Result<U256, VaultError> {
        let books = self.books.lock();
        let params = Self::params(&books, strategy)?;
        Ok(self.outstanding(&books, &params))
    }

    async fn credit_available(&self, strategy: Address) -> Result<U256, VaultError> {
        let books = self.books.lock();
        let params = Self::params(&books, strategy)?;
        Ok(self.credit(&books, &params))
    }

    async fn strategy_params(&self, strategy: Address) -> Result<StrategyParams, VaultError> {
        Self::params(&self.books.lock(), strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utils::ManualClock;

    fn setup() -> (Token, SimVault, Address) {
        let token = Token::new(Address::with_last_byte(1), "WFTM", 18);
        let vault = SimVault::new(
            Address::with_last_byte(0x90),
            token.clone(),
            Arc::new(ManualClock::new(1_000)),
        );
        let depositor = Address::with_last_byte(0x11);
        token.mint(depositor, token.units(1_000)).unwrap();
        vault.deposit(depositor, token.units(1_000)).unwrap();
        let strategy = Address::with_last_byte(0x20);
        vault.add_strategy(strategy, 5_000, U256::MAX).unwrap();
        (token, vault, strategy)
    }

    #[tokio::test]
    async fn first_report_lends_up_to_debt_ratio() {
        let (token, vault, strategy) = setup();
        assert_eq!(vault.credit_available(strategy).await.unwrap(), token.units(500));
        let outstanding = vault.report(strategy, U256::ZERO, U256::ZERO, U256::ZERO).await.unwrap();
        assert!(outstanding.is_zero());
        assert_eq!(token.balance_of(strategy), token.units(500));
        assert_eq!(vault.debt(strategy).await.unwrap(), token.units(500));
        assert_eq!(vault.total_assets(), token.units(1_000));
    }

    #[tokio::test]
    async fn gain_is_returned_and_loss_cuts_debt() {
        let (token, vault, strategy) = setup();
        vault.report(strategy, U256::ZERO, U256::ZERO, U256::ZERO).await.unwrap();

        token.mint(strategy, token.units(50)).unwrap();
        vault.report(strategy, token.units(50), U256::ZERO, U256::ZERO).await.unwrap();
        let params = vault.strategy_params(strategy).await.unwrap();
        assert_eq!(params.total_gain, token.units(50));
        assert_eq!(params.total_debt, token.units(500));
        assert_eq!(token.balance_of(strategy), token.units(500));
        // the returned gain raises the limit to 525 for the next report
        assert_eq!(vault.credit_available(strategy).await.unwrap(), token.units(25));

        token.burn(strategy, token.units(25)).unwrap();
        vault.report(strategy, U256::ZERO, token.units(25), U256::ZERO).await.unwrap();
        let params = vault.strategy_params(strategy).await.unwrap();
        assert_eq!(params.total_loss, token.units(25));
        assert!(params.debt_ratio < 5_000);
        assert!(params.total_debt <= token.units(500));
    }

    #[tokio::test]
    async fn zero_ratio_calls_back_all_debt() {
        let (token, vault, strategy) = setup();
        vault.report(strategy, U256::ZERO, U256::ZERO, U256::ZERO).await.unwrap();
        vault.update_debt_ratio(strategy, 0).await.unwrap();
        assert_eq!(vault.debt_outstanding(strategy).await.unwrap(), token.units(500));
        let outstanding = vault
            .report(strategy, U256::ZERO, U256::ZERO, token.units(500))
            .await
            .unwrap();
        assert!(outstanding.is_zero());
        assert!(token.balance_of(strategy).is_zero());
        assert_eq!(vault.idle(), token.units(1_000));
    }

    #[tokio::test]
    async fn migration_moves_debt_to_the_new_strategy() {
        let (token, vault, strategy) = setup();
        vault.report(strategy, U256::ZERO, U256::ZERO, U256::ZERO).await.unwrap();
        let next = Address::with_last_byte(0x21);

        vault.migrate_strategy(strategy, next).await.unwrap();
        let moved = vault.strategy_params(next).await.unwrap();
        assert_eq!(moved.total_debt, token.units(500));
        assert_eq!(moved.debt_ratio, 5_000);
        let retired = vault.strategy_params(strategy).await.unwrap();
        assert!(retired.total_debt.is_zero());
        assert_eq!(retired.debt_ratio, 0);
        assert_eq!(vault.total_assets(), token.units(1_000));

        let err = vault.migrate_strategy(next, strategy).await.unwrap_err();
        assert_eq!(err, VaultError::DuplicateStrategy(strategy));
        let err = vault
            .migrate_strategy(Address::with_last_byte(0x99), Address::with_last_byte(0x98))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::UnknownStrategy(_)));
    }

    #[tokio::test]
    async fn report_without_funds_fails_cleanly() {
        let (token, vault, strategy) = setup();
        let err = vault
            .report(strategy, token.units(1), U256::ZERO, U256::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Token(_)));
        assert!(vault.debt(strategy).await.unwrap().is_zero());
    }
}
