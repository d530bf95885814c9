use std::env;

use anyhow::bail;
use dotenv::dotenv;
use log::{error, info};
use stock_price_api::config::Config;
use stock_price_api::models::{HistoryPoint, Period};
use stock_price_api::services::market_data::{MarketDataClient, YahooClient};
use stock_price_api::services::validation::validate_period;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let mut args = env::args().skip(1);
    let ticker = match args.next() {
        Some(ticker) => ticker,
        None => bail!("usage: fetch_history <TICKER> [PERIOD]"),
    };
    let period = match args.next() {
        Some(raw) => validate_period(&raw)?,
        None => Period::default(),
    };

    let config = Config::from_env()?;
    let client = YahooClient::with_base_url(config.yahoo_base_url)?;

    info!("Testing provider history for {} ({})...", ticker, period);
    match client.history(&ticker, period).await {
        Ok(series) => {
            info!("SUCCESS: {} bars for {}", series.len(), ticker);
            let points: Vec<HistoryPoint> = series.iter().map(HistoryPoint::from).collect();
            println!("{}", serde_json::to_string_pretty(&points)?);
        }
        Err(e) => {
            error!("ERROR: Failed to fetch history for {} [{}]: {}", ticker, e.kind(), e);
            return Err(e.into());
        }
    }

    Ok(())
}
