// src/services/market_data.rs
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{debug, info};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::models::{Period, PriceBar, PriceSeries};

pub const DEFAULT_YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Failures at the provider boundary. Symbols the provider does not know
/// are not an error: they come back as an empty series.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream rate limited the request")]
    RateLimited,
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("upstream error {code}: {description}")]
    Upstream { code: String, description: String },
    #[error("malformed upstream response: {0}")]
    InvalidResponse(String),
}

impl MarketDataError {
    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketDataError::Transport(_)
            | MarketDataError::RateLimited
            | MarketDataError::Status(_) => "upstream_unavailable",
            MarketDataError::Upstream { .. } => "upstream_error",
            MarketDataError::InvalidResponse(_) => "invalid_response",
        }
    }
}

#[async_trait]
pub trait MarketDataClient: Send + Sync {
    async fn history(&self, ticker: &str, period: Period) -> Result<PriceSeries, MarketDataError>;
}

/// Daily bars from the Yahoo Finance chart endpoint.
#[derive(Clone)]
pub struct YahooClient {
    client: Client,
    base_url: String,
}

impl YahooClient {
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, MarketDataError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MarketDataClient for YahooClient {
    async fn history(&self, ticker: &str, period: Period) -> Result<PriceSeries, MarketDataError> {
        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_url,
            urlencoding::encode(ticker)
        );
        info!("Fetching {} history for {} from {}", period, ticker, url);

        let response = self
            .client
            .get(&url)
            .query(&[("range", period.as_str()), ("interval", "1d")])
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => return Err(MarketDataError::RateLimited),
            StatusCode::NOT_FOUND => {
                debug!("Provider has no data for {}", ticker);
                return Ok(Vec::new());
            }
            s if !s.is_success() => return Err(MarketDataError::Status(s.as_u16())),
            _ => {}
        }

        let body = response.text().await?;
        let series = parse_chart(&body)?;
        debug!("Parsed {} bars for {} ({})", series.len(), ticker, period);
        Ok(series)
    }
}

/// Turns a chart response body into bars. Rows without a close are skipped.
pub fn parse_chart(body: &str) -> Result<PriceSeries, MarketDataError> {
    let response: ChartResponse = serde_json::from_str(body)
        .map_err(|e| MarketDataError::InvalidResponse(e.to_string()))?;

    if let Some(error) = response.chart.error {
        if error.code == "Not Found" {
            return Ok(Vec::new());
        }
        return Err(MarketDataError::Upstream {
            code: error.code,
            description: error.description.unwrap_or_default(),
        });
    }

    let result = match response.chart.result.and_then(|r| r.into_iter().next()) {
        Some(result) => result,
        None => return Ok(Vec::new()),
    };
    let first_quote = result.indicators.quote.into_iter().next();
    let (timestamps, quote) = match (result.timestamp, first_quote) {
        (Some(ts), Some(quote)) => (ts, quote),
        _ => return Ok(Vec::new()),
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.into_iter().enumerate() {
        let close = match quote.close.get(i).copied().flatten() {
            Some(close) => close,
            None => continue,
        };
        let date = Utc.timestamp_opt(ts, 0).single().ok_or_else(|| {
            MarketDataError::InvalidResponse(format!("invalid timestamp {}", ts))
        })?;
        bars.push(PriceBar {
            date,
            open: quote.open.get(i).copied().flatten(),
            high: quote.high.get(i).copied().flatten(),
            low: quote.low.get(i).copied().flatten(),
            close,
            volume: quote.volume.get(i).copied().flatten(),
        });
    }
    bars.sort_by_key(|bar| bar.date);
    Ok(bars)
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartData,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}
