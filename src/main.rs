use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use log::info;
use warp::Filter;

use stock_price_api::config::Config;
use stock_price_api::routes;
use stock_price_api::services::cache::PriceCache;
use stock_price_api::services::market_data::{MarketDataClient, YahooClient};
use stock_price_api::services::rate_limit::RateLimits;

const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;

    // RUST_LOG wins over the FLASK_DEBUG default
    let log_env = env_logger::Env::default().default_filter_or(config.default_log_level());
    env_logger::Builder::from_env(log_env).init();
    info!("Logger initialized. Starting the application...");
    info!(
        "Cache: capacity {}, max age {:?}",
        config.cache_capacity,
        config.cache_max_age()
    );

    let client: Arc<dyn MarketDataClient> = Arc::new(
        YahooClient::with_base_url(config.yahoo_base_url.clone())
            .context("failed to build market data client")?,
    );
    let cache = Arc::new(PriceCache::new(
        client,
        config.cache_capacity,
        config.cache_max_age(),
    ));

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!("Will bind to: {}", addr);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_header("content-type")
        .allow_methods(vec!["GET"]);

    let limits = Arc::new(RateLimits::new(&config.rate_limits));
    limits.spawn_pruner(RATE_LIMIT_PRUNE_INTERVAL);

    let api = routes::routes(cache, limits)
        .with(cors)
        .with(warp::log("stock_price_api"));
    info!("Routes configured successfully with CORS.");

    info!("Starting server on {}", addr);
    warp::serve(api).run(addr).await;
    Ok(())
}
