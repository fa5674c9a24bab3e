//! Epoch simulation: runs hedged epochs against in-memory venues, one day per step,
//! and prints a JSON snapshot per day and a JSON settlement per closed epoch.
//!
//! Usage: epoch-sim [config.toml]
//!
//! Without a config file the defaults below apply: a constant-product pair at 0.5,
//! a single IL hedge and a price path that drifts down then recovers.

use std::path::Path;

use alloy::primitives::U256;
use anyhow::{bail, Context};
use clients_amm::AmmKind;
use joint::testkit::{HedgeSetup, SimWorld, DAY};
use joint::JointConfig;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
    format: String,
}

impl LoggingConfig {
    fn init(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        match self.format.as_str() {
            "json" => fmt().json().with_env_filter(filter).init(),
            _ => fmt().with_env_filter(filter).init(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WorldConfig {
    amm: AmmKind,
    hedge: HedgeSetup,
    /// Starting price, whole B per whole A
    price: f64,
    deposits: (u64, u64),
    /// Reward tokens emitted per second to staked liquidity; constant-product only
    rewards_per_sec: Option<u64>,
    /// Relative price change applied each simulated day, cycled
    daily_moves: Vec<f64>,
    epochs: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            amm: AmmKind::ConstantProduct,
            hedge: HedgeSetup::Single,
            price: 0.5,
            deposits: (10_000, 5_000),
            rewards_per_sec: Some(1),
            daily_moves: vec![-0.02, -0.03, 0.01, 0.02, -0.01, 0.015, 0.0],
            epochs: 2,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SimConfig {
    logging: LoggingConfig,
    world: WorldConfig,
    /// Joint parameters; governance and keeper are the simulation's own accounts
    joint: JointConfig,
}

impl SimConfig {
    fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) => SimConfig::load(path.trim())?,
        None => SimConfig::default(),
    };
    config.logging.init();
    if config.world.daily_moves.is_empty() {
        bail!("world.daily_moves must list at least one move");
    }

    let joint_config = config.joint.clone();
    let mut builder = SimWorld::builder()
        .amm(config.world.amm)
        .hedge(config.world.hedge)
        .price(config.world.price)
        .deposits(config.world.deposits.0, config.world.deposits.1)
        .config(move |c| {
            *c = JointConfig {
                governance: c.governance,
                keeper: c.keeper,
                ..joint_config
            }
        });
    if let Some(per_sec) = config.world.rewards_per_sec {
        builder = builder.rewards(per_sec);
    }
    let mut world = builder.build().await?;
    let keeper = world.keeper;

    let first = world.start_epoch().await?;
    info!(epoch = first, price = world.price().await?, "simulation started");

    let mut settled = 0;
    for (day, change) in config.world.daily_moves.iter().cycle().enumerate() {
        if settled >= config.world.epochs {
            break;
        }
        world.advance(DAY);
        world.move_price_by(*change).await?;

        if world.joint.should_recenter().await? {
            world.joint.recenter(keeper).await?;
        }
        if world.joint.harvest_trigger().await? {
            world.joint.harvest(keeper).await?;
        }
        let snapshot = world.joint.snapshot().await?;
        println!("{}", serde_json::to_string(&snapshot)?);

        let due = world.provider_a.harvest_trigger(&world.joint, U256::ZERO).await?
            || world.provider_b.harvest_trigger(&world.joint, U256::ZERO).await?;
        if !due {
            continue;
        }
        let (a, b) = world.harvest_providers().await?;
        if let Some(settlement) = a.settlement.or(b.settlement) {
            settled += 1;
            let (return_a, return_b) = settlement.returns();
            info!(day = day + 1, epoch = settlement.epoch_id, return_a, return_b, "epoch closed");
            println!("{}", serde_json::to_string(&settlement)?);
        }
    }

    info!(
        settled,
        vault_a = %world.vault_a.total_assets(),
        vault_b = %world.vault_b.total_assets(),
        "simulation finished"
    );
    Ok(())
}
