// src/handlers/stock.rs
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use log::{error, info};
use warp::reply::Json;
use warp::Rejection;

use super::error::ApiError;
use crate::models::{HistoryPoint, HistoryQuery, LatestPrice, Period, PriceHistory, ServiceInfo};
use crate::services::cache::PriceCache;
use crate::services::market_data::MarketDataError;
use crate::services::validation::{validate_period, validate_ticker, ValidationError};

pub async fn get_home() -> Result<Json, Rejection> {
    Ok(warp::reply::json(&ServiceInfo {
        message: "Stock Price Predictor API",
        status: "running",
        version: "1.0",
    }))
}

pub async fn get_stock_price(
    raw_ticker: String,
    cache: Arc<PriceCache>,
) -> Result<Json, Rejection> {
    info!("Handling request to get latest price for {}", raw_ticker);

    let ticker = parse_ticker(&raw_ticker)?;
    let series = cache
        .fetch(&ticker, Period::OneDay)
        .await
        .map_err(|e| upstream_failure(&ticker, e))?;

    let latest = series
        .last()
        .ok_or_else(|| warp::reject::custom(ApiError::NotFound))?;

    Ok(warp::reply::json(&LatestPrice {
        ticker,
        price: latest.close,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    }))
}

pub async fn get_stock_history(
    raw_ticker: String,
    query: HistoryQuery,
    cache: Arc<PriceCache>,
) -> Result<Json, Rejection> {
    info!("Handling request to get price history for {}", raw_ticker);

    let ticker = parse_ticker(&raw_ticker)?;
    let period = match query.period.as_deref() {
        Some(raw) => validate_period(raw).map_err(reject_invalid)?,
        None => Period::default(),
    };

    let series = cache
        .fetch(&ticker, period)
        .await
        .map_err(|e| upstream_failure(&ticker, e))?;

    if series.is_empty() {
        return Err(warp::reject::custom(ApiError::NotFound));
    }

    Ok(warp::reply::json(&PriceHistory {
        ticker,
        history: series.iter().map(HistoryPoint::from).collect(),
        period,
    }))
}

/// Percent-decodes the path segment and validates it.
fn parse_ticker(raw: &str) -> Result<String, Rejection> {
    let ticker = urlencoding::decode(raw)
        .map_err(|_| reject_invalid(ValidationError::InvalidTicker))?
        .into_owned();
    validate_ticker(&ticker).map_err(reject_invalid)?;
    Ok(ticker)
}

fn reject_invalid(err: ValidationError) -> Rejection {
    warp::reject::custom(ApiError::from(err))
}

fn upstream_failure(ticker: &str, err: MarketDataError) -> Rejection {
    error!("Failed to fetch market data for {} [{}]: {}", ticker, err.kind(), err);
    warp::reject::custom(ApiError::Internal)
}
