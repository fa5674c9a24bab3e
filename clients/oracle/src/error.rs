use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to parse price response: {0}")]
    Parse(String),

    #[error("oracle price {oracle_price} deviates {deviation_bps} bps from pool price {pool_price} (max {max_bps})")]
    Deviation {
        oracle_price: f64,
        pool_price: f64,
        deviation_bps: u64,
        max_bps: u64,
    },

    #[error("no price available")]
    Unavailable,
}
