use alloy::primitives::{Address, U256};
use clients_amm::AmmError;
use clients_erc20::TokenError;
use clients_hedge::{HedgeError, HedgeId};
use clients_oracle::OracleError;
use clients_staking::StakingError;
use clients_vault::VaultError;
use thiserror::Error;
use utils::PairAmounts;

use crate::{Asset, EpochPhase};

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Calls rejected outright because of who made them or when.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateViolation {
    #[error("{caller} is not allowed to {action}")]
    Unauthorized { caller: Address, action: &'static str },

    #[error("epoch {0} is already active")]
    EpochActive(u64),

    #[error("cannot {action} while {phase}")]
    WrongPhase { phase: EpochPhase, action: &'static str },

    #[error("hedge {0} is still active")]
    HedgeActive(HedgeId),

    #[error("both assets must be forwarded before investing, have {0}")]
    NotFunded(PairAmounts),

    #[error("harvest cooldown has {remaining}s left")]
    Cooldown { remaining: u64 },

    #[error("position still holds {0} liquidity")]
    PositionNotEmpty(U256),

    #[error("{action} is not supported by this venue")]
    Unsupported { action: &'static str },

    #[error("{0} is not the joint's provider any more")]
    NotProvider(Address),

    #[error("cannot sweep {token}: {reason}")]
    ProtectedToken { token: Address, reason: &'static str },
}

#[derive(Error, Debug)]
pub enum JointError {
    #[error("slippage exceeded: received {received}, minimum {minimum}")]
    SlippageExceeded { received: U256, minimum: U256 },

    #[error("hedge premium {cost:.0} exceeds budget {budget:.0}")]
    HedgeBudgetExceeded { cost: f64, budget: f64 },

    #[error("cannot sell {amount} {asset} to rebalance: {reason}")]
    InsufficientLiquidityToRebalance {
        asset: Asset,
        amount: U256,
        reason: String,
    },

    #[error("health check failed: gain {gain}, loss {loss} against debt {debt}")]
    HealthCheckViolation { gain: U256, loss: U256, debt: U256 },

    #[error(transparent)]
    StateViolation(#[from] StateViolation),

    #[error("amm: {0}")]
    Amm(AmmError),

    #[error("hedge: {0}")]
    Hedge(HedgeError),

    #[error("oracle: {0}")]
    Oracle(#[from] OracleError),

    #[error("staking: {0}")]
    Staking(#[from] StakingError),

    #[error("vault: {0}")]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<AmmError> for JointError {
    fn from(err: AmmError) -> Self {
        match err {
            AmmError::SlippageExceeded { received, minimum } => {
                JointError::SlippageExceeded { received, minimum }
            }
            AmmError::ExcessiveInput { required, maximum } => JointError::SlippageExceeded {
                received: maximum,
                minimum: required,
            },
            AmmError::Token(err) => JointError::Token(err),
            other => JointError::Amm(other),
        }
    }
}

impl From<HedgeError> for JointError {
    fn from(err: HedgeError) -> Self {
        match err {
            HedgeError::BudgetExceeded { cost, budget } => {
                JointError::HedgeBudgetExceeded { cost, budget }
            }
            HedgeError::AlreadyActive(id) => StateViolation::HedgeActive(id).into(),
            HedgeError::Oracle(err) => JointError::Oracle(err),
            HedgeError::Token(err) => JointError::Token(err),
            other => JointError::Hedge(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_errors_map_onto_taxonomy() {
        let slippage: JointError = AmmError::SlippageExceeded {
            received: U256::from(1u64),
            minimum: U256::from(2u64),
        }
        .into();
        assert!(matches!(slippage, JointError::SlippageExceeded { .. }));

        let budget: JointError = HedgeError::BudgetExceeded {
            cost: 2.0,
            budget: 1.0,
        }
        .into();
        assert!(matches!(budget, JointError::HedgeBudgetExceeded { .. }));

        let active: JointError = HedgeError::AlreadyActive(HedgeId(3)).into();
        assert!(matches!(
            active,
            JointError::StateViolation(StateViolation::HedgeActive(HedgeId(3)))
        ));

        let other: JointError = AmmError::InsufficientLiquidity.into();
        assert!(matches!(other, JointError::Amm(AmmError::InsufficientLiquidity)));
    }
}
