use std::io::Write;

use joint::config::HedgeBudgetPolicy;
use joint::{ConfigError, JointConfig, ProviderConfig};

const CONFIG: &str = r#"
governance = "0x00000000000000000000000000000000000000d0"
keeper = "0x00000000000000000000000000000000000000d1"
period_secs = 432000
min_time_to_maturity_secs = 7200

[hedge]
protection_range_bps = 1000
budget_bps = 80
budget_policy = "unhedged"

[slippage]
max_slippage_bps = 50

[recenter]
ticks_from_current = 4
"#;

#[test]
fn loads_a_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();

    let config = JointConfig::load(file.path()).unwrap();
    assert_eq!(config.period_secs, 5 * 86_400);
    assert_eq!(config.min_time_to_maturity_secs, 7_200);
    assert_eq!(config.hedge.protection_range_bps, 1_000);
    assert_eq!(config.hedge.budget_bps, 80);
    assert_eq!(config.hedge.budget_policy, HedgeBudgetPolicy::Unhedged);
    assert_eq!(config.slippage.max_slippage_bps, 50);
    // untouched fields keep their defaults
    assert_eq!(config.slippage.max_rebalance_impact_bps, 300);
    assert_eq!(config.harvest.cooldown_secs, 6 * 3_600);
    assert_eq!(config.recenter.ticks_from_current, 4);
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = JointConfig::load(dir.path().join("joint.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile(_)));
}

#[test]
fn invalid_values_are_rejected_on_load() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let raw = CONFIG.replace("budget_bps = 80", "budget_bps = 12000");
    file.write_all(raw.as_bytes()).unwrap();

    let err = JointConfig::load(file.path()).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::InvalidValue {
            field: "hedge.budget_bps",
            ..
        }
    ));
}

#[test]
fn provider_flags_parse_with_defaults() {
    let config: ProviderConfig = toml::from_str("take_profit = true\nloss_limit_bps = 50\n").unwrap();
    assert!(config.take_profit);
    assert!(config.invest_want);
    assert!(config.do_health_check);
    assert_eq!(config.loss_limit_bps, 50);
    assert_eq!(config.profit_limit_bps, 100);
    assert!(config.validate().is_ok());
}
