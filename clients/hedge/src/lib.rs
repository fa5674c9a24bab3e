//! Impermanent-loss protection venues and the providers the joint opens hedges through.
//!
//! [`HedgeProvider`] is the one interface the joint sees. [`HedgilProvider`] wraps a
//! single-instrument venue; [`DualOptionProvider`] coordinates a call and a put.

mod dual;
mod error;
mod hedgil;
pub mod pricing;
mod provider;
pub mod sim;
mod types;

pub use dual::{DualOptionProvider, OptionInfo, OptionKind, OptionsVenue};
pub use error::HedgeError;
pub use hedgil::{HedgilInfo, HedgilProvider, HedgilVenue};
pub use provider::HedgeProvider;
pub use types::{HedgeId, HedgeKind, HedgePosition, HedgeQuote, HedgeRequest};
