use alloy::primitives::{Address, U256};
use clients_erc20::TokenError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmmError {
    #[error("slippage exceeded: received {received} < minimum {minimum}")]
    SlippageExceeded { received: U256, minimum: U256 },

    #[error("excessive input: required {required} > maximum {maximum}")]
    ExcessiveInput { required: U256, maximum: U256 },

    #[error("insufficient liquidity")]
    InsufficientLiquidity,

    #[error("no route from {token_in} to {token_out}")]
    NoRoute { token_in: Address, token_out: Address },

    #[error("token {0} is not traded by this venue")]
    UnknownToken(Address),

    #[error("invalid tick range [{lower}, {upper})")]
    InvalidRange { lower: i32, upper: i32 },

    #[error("position still holds liquidity")]
    PositionNotEmpty,

    #[error("amount must be non-zero")]
    ZeroAmount,

    #[error(transparent)]
    Token(#[from] TokenError),
}
