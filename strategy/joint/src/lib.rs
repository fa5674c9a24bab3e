//! Hedged joint liquidity strategy.
//!
//! Two vault strategies each lend one asset of a pair to a [`Joint`], which provides
//! liquidity with both for one epoch at a time, buys impermanent-loss protection for the
//! epoch, and hands each side back its asset at settlement with equal percentage returns.

pub mod config;
mod epoch;
mod error;
mod harvester;
mod joint;
mod manual;
mod provider;
mod types;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use config::{HedgeBudgetPolicy, JointConfig, ProviderConfig};
pub use epoch::{Epoch, EpochPhase, EpochState};
pub use error::{ConfigError, JointError, StateViolation};
pub use harvester::RewardHarvester;
pub use joint::{rebalance_sell, Joint, JointParts};
pub use manual::{AdminCommand, ManualCommand};
pub use provider::ProviderAdapter;
pub use types::{Asset, HarvestReport, JointSnapshot, ProviderReport, Role, Settlement};
