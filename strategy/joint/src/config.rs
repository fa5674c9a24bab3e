//! Joint and provider configuration, loadable from TOML.

use std::path::Path;

use alloy::primitives::{Address, U256};
use clients_amm::SwapRoute;
use serde::{Deserialize, Serialize};
use utils::BPS;

use crate::ConfigError;

const DAY: u64 = 24 * 60 * 60;

/// What invest does when the hedge premium is over budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HedgeBudgetPolicy {
    /// Abort the invest call
    #[default]
    Fail,
    /// Open the epoch without protection
    Unhedged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HedgeConfig {
    pub enabled: bool,
    /// Maximum relative move the hedge covers
    pub protection_range_bps: u64,
    /// Premium ceiling relative to the hedged notional's value
    pub budget_bps: u64,
    pub budget_policy: HedgeBudgetPolicy,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protection_range_bps: 1_500,
            budget_bps: 100,
            budget_policy: HedgeBudgetPolicy::Fail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Raw reward tokens below which compounding is skipped
    pub min_reward_to_harvest: U256,
    /// Share of converted rewards swapped into A; the rest goes to B
    pub reward_to_a_bps: u64,
    /// Minimum seconds between compounding harvests
    pub cooldown_secs: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            min_reward_to_harvest: U256::ZERO,
            reward_to_a_bps: 5_000,
            cooldown_secs: 6 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlippageConfig {
    /// Bound applied to every swap and liquidity operation
    pub max_slippage_bps: u64,
    /// Largest price impact accepted for the settlement swap
    pub max_rebalance_impact_bps: u64,
}

impl Default for SlippageConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: 100,
            max_rebalance_impact_bps: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecenterConfig {
    pub enabled: bool,
    /// Half-width of the window, in tick spacings
    pub ticks_from_current: i32,
}

impl Default for RecenterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ticks_from_current: 2,
        }
    }
}

/// Joint parameters. Venues are passed to [`crate::Joint::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointConfig {
    /// Account allowed to run manual and administrative commands
    pub governance: Address,
    /// Account allowed to invest, harvest, recenter and end epochs
    pub keeper: Address,
    pub period_secs: u64,
    /// The epoch should end once the hedge has less than this left
    pub min_time_to_maturity_secs: u64,
    /// Largest oracle/pool disagreement accepted around hedge operations
    pub max_oracle_deviation_bps: u64,
    pub swap_route: SwapRoute,
    pub hedge: HedgeConfig,
    pub harvest: HarvestConfig,
    pub slippage: SlippageConfig,
    pub recenter: RecenterConfig,
}

impl Default for JointConfig {
    fn default() -> Self {
        Self {
            governance: Address::ZERO,
            keeper: Address::ZERO,
            period_secs: 7 * DAY,
            min_time_to_maturity_secs: 60 * 60,
            max_oracle_deviation_bps: 200,
            swap_route: SwapRoute::Primary,
            hedge: HedgeConfig::default(),
            harvest: HarvestConfig::default(),
            slippage: SlippageConfig::default(),
            recenter: RecenterConfig::default(),
        }
    }
}

fn check_bps(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value > BPS {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("{value} bps is over {BPS}"),
        });
    }
    Ok(())
}

impl JointConfig {
    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.governance == Address::ZERO {
            return Err(ConfigError::MissingField { field: "governance" });
        }
        if self.period_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "period_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.min_time_to_maturity_secs >= self.period_secs {
            return Err(ConfigError::InvalidValue {
                field: "min_time_to_maturity_secs",
                reason: format!(
                    "{} must be below the {}s period",
                    self.min_time_to_maturity_secs, self.period_secs
                ),
            });
        }
        check_bps("max_oracle_deviation_bps", self.max_oracle_deviation_bps)?;
        check_bps("hedge.protection_range_bps", self.hedge.protection_range_bps)?;
        check_bps("hedge.budget_bps", self.hedge.budget_bps)?;
        if self.hedge.enabled
            && (self.hedge.protection_range_bps == 0 || self.hedge.protection_range_bps == BPS)
        {
            return Err(ConfigError::InvalidValue {
                field: "hedge.protection_range_bps",
                reason: "must be strictly between 0 and 10000 when hedging".to_string(),
            });
        }
        check_bps("harvest.reward_to_a_bps", self.harvest.reward_to_a_bps)?;
        check_bps("slippage.max_slippage_bps", self.slippage.max_slippage_bps)?;
        check_bps(
            "slippage.max_rebalance_impact_bps",
            self.slippage.max_rebalance_impact_bps,
        )?;
        if self.recenter.ticks_from_current < 0 {
            return Err(ConfigError::InvalidValue {
                field: "recenter.ticks_from_current",
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-provider switches, mirroring a vault strategy's keeper flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Forward want to the joint at harvest
    pub invest_want: bool,
    /// End the open epoch at the next harvest
    pub take_profit: bool,
    /// Force the next harvest trigger
    pub launch_harvest: bool,
    pub do_health_check: bool,
    pub profit_limit_bps: u64,
    pub loss_limit_bps: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            invest_want: true,
            take_profit: false,
            launch_harvest: false,
            do_health_check: true,
            profit_limit_bps: 100,
            loss_limit_bps: 1,
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_bps("profit_limit_bps", self.profit_limit_bps)?;
        check_bps("loss_limit_bps", self.loss_limit_bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
governance = "0x0000000000000000000000000000000000000001"
keeper = "0x0000000000000000000000000000000000000002"
"#;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = JointConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.period_secs, 7 * DAY);
        assert_eq!(config.hedge.protection_range_bps, 1_500);
        assert_eq!(config.swap_route, SwapRoute::Primary);
        assert_eq!(config.recenter.ticks_from_current, 2);
    }

    #[test]
    fn nested_tables_override_defaults() {
        let raw = format!(
            "{MINIMAL}\nperiod_secs = 259200\nswap_route = \"stable\"\n\n[hedge]\nbudget_policy = \"unhedged\"\nprotection_range_bps = 1000\n\n[harvest]\nmin_reward_to_harvest = \"1000000000000000000\"\n"
        );
        let config = JointConfig::from_toml(&raw).unwrap();
        assert_eq!(config.period_secs, 3 * DAY);
        assert_eq!(config.swap_route, SwapRoute::Stable);
        assert_eq!(config.hedge.budget_policy, HedgeBudgetPolicy::Unhedged);
        assert_eq!(config.hedge.protection_range_bps, 1_000);
        assert!(config.hedge.enabled);
        assert_eq!(
            config.harvest.min_reward_to_harvest,
            U256::from(1_000_000_000_000_000_000u64)
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        let missing = JointConfig::default().validate().unwrap_err();
        assert!(matches!(missing, ConfigError::MissingField { field: "governance" }));

        let mut config = JointConfig::from_toml(MINIMAL).unwrap();
        config.min_time_to_maturity_secs = config.period_secs;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "min_time_to_maturity_secs",
                ..
            })
        ));

        let mut config = JointConfig::from_toml(MINIMAL).unwrap();
        config.slippage.max_slippage_bps = 10_001;
        assert!(config.validate().is_err());

        let mut config = JointConfig::from_toml(MINIMAL).unwrap();
        config.hedge.protection_range_bps = 0;
        assert!(config.validate().is_err());
        config.hedge.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            JointConfig::from_toml("period_secs = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
