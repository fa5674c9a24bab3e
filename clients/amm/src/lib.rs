//! AMM venues and the adapters the joint deposits through.
//!
//! Venue traits ([`SwapVenue`], [`ConstantProductVenue`], [`ConcentratedVenue`]) describe
//! the pools themselves in their own token0/token1 order. Adapters ([`AmmAdapter`]) map a
//! venue onto the joint's A/B pair.

mod adapter;
mod concentrated;
mod constant_product;
mod error;
pub mod math;
mod router;
pub mod sim;
mod types;
mod venue;

pub use adapter::AmmAdapter;
pub use concentrated::ConcentratedAdapter;
pub use constant_product::ConstantProductAdapter;
pub use error::AmmError;
pub use router::{SwapRoute, SwapRouter};
pub use types::{AmmKind, DepositQuote, PositionData, ReservesSnapshot, TickRange};
pub use venue::{ConcentratedVenue, ConstantProductVenue, MintReceipt, Slot0, SwapVenue, VenuePosition};
