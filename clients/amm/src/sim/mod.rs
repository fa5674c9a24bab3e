//! In-memory pools used by simulations and tests.

mod pair;
mod pool;
mod stable;

pub use pair::{ConstantProductPair, MINIMUM_LIQUIDITY};
pub use pool::ConcentratedPool;
pub use stable::StablePool;
