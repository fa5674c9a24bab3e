use clients_erc20::TokenError;
use clients_oracle::OracleError;
use thiserror::Error;

use crate::HedgeId;

#[derive(Error, Debug)]
pub enum HedgeError {
    #[error("hedge cost {cost} exceeds budget {budget}")]
    BudgetExceeded { cost: f64, budget: f64 },

    #[error("a hedge is already active: {0}")]
    AlreadyActive(HedgeId),

    #[error("unknown hedge position {0}")]
    UnknownPosition(HedgeId),

    #[error("invalid hedge parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Token(#[from] TokenError),
}
