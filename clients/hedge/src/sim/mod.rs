//! Oracle-priced venue simulations used by tests and the demo binaries.

mod hedgil;
mod options;

pub use hedgil::SimHedgil;
pub use options::SimOptions;
