use std::env;

use anyhow::{bail, Context};
use dotenv::dotenv;
use log::{error, info};
use stock_price_api::config::Config;
use stock_price_api::services::forecast::{predict_arima, DEFAULT_HORIZON};
use stock_price_api::services::market_data::YahooClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let mut args = env::args().skip(1);
    let ticker = match args.next() {
        Some(ticker) => ticker,
        None => bail!("usage: forecast <TICKER> [DAYS]"),
    };
    let days = match args.next() {
        Some(raw) => raw.parse().with_context(|| format!("DAYS must be a number, got '{}'", raw))?,
        None => DEFAULT_HORIZON,
    };

    let config = Config::from_env()?;
    let client = YahooClient::with_base_url(config.yahoo_base_url)?;

    info!("Forecasting {} days for {}...", days, ticker);
    match predict_arima(&client, &ticker, days).await {
        Ok(forecast) => {
            info!("SUCCESS: {} forecast computed", ticker);
            println!("{}", serde_json::to_string(&forecast)?);
        }
        Err(e) => {
            error!("ERROR: Failed to forecast {}: {}", ticker, e);
            return Err(e.into());
        }
    }

    Ok(())
}
