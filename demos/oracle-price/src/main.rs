//! Oracle price example: poll the Binance public ticker and print the human and raw price.
//!
//! Usage: oracle-price <symbol> <decimals_a> <decimals_b> [polls]

use std::time::Duration;

use clients_oracle::{BinanceTickerConfig, BinanceTickerOracle, PriceOracle};
use tracing_subscriber::{fmt, EnvFilter};

const BASE_URL: &str = "https://api.binance.com";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "Usage: {} <symbol> <decimals_a> <decimals_b> [polls]",
            args.first().map(|s| s.as_str()).unwrap_or("oracle-price")
        );
        std::process::exit(1);
    }
    let config = BinanceTickerConfig {
        base_url: BASE_URL.to_string(),
        symbol: args[1].trim().to_uppercase(),
        decimals_a: args[2].trim().parse()?,
        decimals_b: args[3].trim().parse()?,
    };
    let polls: u32 = match args.get(4) {
        Some(raw) => raw.trim().parse()?,
        None => 1,
    };

    let client = reqwest::Client::builder().build()?;
    let oracle = BinanceTickerOracle::new(client, config);
    for poll in 0..polls {
        if poll > 0 {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        let human = oracle.ticker_price().await?;
        let raw = oracle.spot_price().await?;
        println!("{} | price: {} | raw: {:e}", oracle.symbol(), human, raw);
    }
    Ok(())
}
