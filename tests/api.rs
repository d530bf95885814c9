use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use warp::http::StatusCode;

use stock_price_api::models::{Period, PriceBar, PriceSeries};
use stock_price_api::routes::routes;
use stock_price_api::services::cache::{PriceCache, DEFAULT_CAPACITY};
use stock_price_api::services::market_data::{MarketDataClient, MarketDataError};
use stock_price_api::services::rate_limit::{RateLimitConfig, RateLimits};

#[derive(Default)]
struct StubClient {
    series: HashMap<String, PriceSeries>,
    fail: bool,
    calls: AtomicUsize,
    periods: std::sync::Mutex<Vec<Period>>,
}

impl StubClient {
    fn with(mut self, ticker: &str, series: PriceSeries) -> Self {
        self.series.insert(ticker.to_string(), series);
        self
    }

    fn failing() -> Self {
        StubClient {
            fail: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataClient for StubClient {
    async fn history(&self, ticker: &str, period: Period) -> Result<PriceSeries, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.periods.lock().unwrap().push(period);
        if self.fail {
            return Err(MarketDataError::Status(502));
        }
        Ok(self.series.get(ticker).cloned().unwrap_or_default())
    }
}

const UNLIMITED: RateLimitConfig = RateLimitConfig {
    per_day: 1_000_000,
    per_hour: 1_000_000,
    per_route_minute: 1_000_000,
};

fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 14, 30, 0).unwrap()
}

fn aapl_single_bar() -> PriceSeries {
    vec![PriceBar::from_close(day(2024, 1, 2), 150.25)]
}

fn aapl_month() -> PriceSeries {
    vec![
        PriceBar::from_close(day(2024, 1, 2), 185.64),
        PriceBar::from_close(day(2024, 1, 3), 184.25),
        PriceBar::from_close(day(2024, 1, 4), 181.91),
    ]
}

fn cache_for(client: &Arc<StubClient>) -> Arc<PriceCache> {
    let client: Arc<dyn MarketDataClient> = client.clone();
    Arc::new(PriceCache::new(client, DEFAULT_CAPACITY, None))
}

fn limits_from(config: RateLimitConfig) -> Arc<RateLimits> {
    Arc::new(RateLimits::new(&config))
}

async fn get<F>(api: &F, path: &str) -> (StatusCode, Value)
where
    F: warp::Filter + 'static,
    F::Extract: warp::Reply + Send,
{
    let res = warp::test::request().method("GET").path(path).reply(api).await;
    let body = serde_json::from_slice(res.body()).unwrap_or(Value::Null);
    (res.status(), body)
}

#[tokio::test]
async fn home_reports_service_status() {
    let client = Arc::new(StubClient::default());
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    let (status, body) = get(&api, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"message": "Stock Price Predictor API", "status": "running", "version": "1.0"})
    );
}

#[tokio::test]
async fn latest_price_returns_last_close() {
    let client = Arc::new(StubClient::default().with("AAPL", aapl_single_bar()));
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    let (status, body) = get(&api, "/stock/AAPL").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ticker"], "AAPL");
    assert_eq!(body["price"], 150.25);
    let timestamp = body["timestamp"].as_str().unwrap();
    assert!(DateTime::parse_from_rfc3339(timestamp).is_ok(), "{timestamp}");
    assert_eq!(*client.periods.lock().unwrap(), vec![Period::OneDay]);
}

#[tokio::test]
async fn latest_price_uses_last_bar_in_sequence() {
    let client = Arc::new(StubClient::default().with("AAPL", aapl_month()));
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    let (_, body) = get(&api, "/stock/AAPL").await;

    assert_eq!(body["price"], 181.91);
}

#[tokio::test]
async fn long_ticker_is_rejected_before_any_upstream_call() {
    let client = Arc::new(StubClient::default());
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    let (status, body) = get(&api, "/stock/UNKNOWNX").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Invalid ticker symbol"}));

    let (status, _) = get(&api, "/stock/history/GOOGLE?period=1y").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn percent_encoded_ticker_is_decoded_before_validation() {
    let client = Arc::new(StubClient::default().with("BRK.B", aapl_single_bar()));
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    let (status, body) = get(&api, "/stock/BRK%2EB").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ticker"], "BRK.B");
}

#[tokio::test]
async fn invalid_period_is_rejected() {
    let client = Arc::new(StubClient::default().with("AAPL", aapl_month()));
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    let (status, body) = get(&api, "/stock/history/AAPL?period=badvalue").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Invalid period"}));

    let (status, body) = get(&api, "/stock/history/TOOLONG?period=badvalue").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Invalid ticker symbol"}));

    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn empty_series_is_not_found_on_both_endpoints() {
    let client = Arc::new(StubClient::default());
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    let (status, body) = get(&api, "/stock/ZZZZ").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "No data found"}));

    let (status, body) = get(&api, "/stock/history/ZZZZ").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "No data found"}));
}

#[tokio::test]
async fn history_keeps_order_and_renames_close_to_price() {
    let client = Arc::new(StubClient::default().with("AAPL", aapl_month()));
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    let (status, body) = get(&api, "/stock/history/AAPL").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ticker"], "AAPL");
    assert_eq!(body["period"], "1mo");
    let history = body["history"].as_array().unwrap();
    let prices: Vec<f64> = history.iter().map(|p| p["price"].as_f64().unwrap()).collect();
    assert_eq!(prices, vec![185.64, 184.25, 181.91]);
    assert!(history.iter().all(|p| p.get("close").is_none()));
    assert_eq!(history[0]["date"], "2024-01-02T14:30:00Z");
    assert_eq!(history[2]["date"], "2024-01-04T14:30:00Z");
    assert_eq!(*client.periods.lock().unwrap(), vec![Period::OneMonth]);
}

#[tokio::test]
async fn history_echoes_requested_period() {
    let client = Arc::new(StubClient::default().with("MSFT", aapl_month()));
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    let (status, body) = get(&api, "/stock/history/MSFT?period=5y").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["period"], "5y");
    assert_eq!(*client.periods.lock().unwrap(), vec![Period::FiveYears]);
}

#[tokio::test]
async fn upstream_failures_are_generic_server_errors() {
    let client = Arc::new(StubClient::failing());
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    let (status, body) = get(&api, "/stock/AAPL").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Internal server error"}));

    let (status, body) = get(&api, "/stock/history/AAPL?period=1y").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Internal server error"}));
}

#[tokio::test]
async fn repeated_requests_hit_the_cache() {
    let client = Arc::new(StubClient::default().with("AAPL", aapl_single_bar()));
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    get(&api, "/stock/AAPL").await;
    get(&api, "/stock/AAPL").await;
    assert_eq!(client.calls(), 1);

    // Same ticker, different period: separate entry.
    get(&api, "/stock/history/AAPL?period=1d").await;
    assert_eq!(client.calls(), 1);
    get(&api, "/stock/history/AAPL?period=5d").await;
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn per_route_limit_is_ten_per_minute_per_client() {
    let client = Arc::new(StubClient::default().with("AAPL", aapl_single_bar()));
    let api = routes(cache_for(&client), limits_from(RateLimitConfig::default()));
    let first: SocketAddr = ([10, 0, 0, 1], 40000).into();
    let second: SocketAddr = ([10, 0, 0, 2], 40000).into();

    for _ in 0..10 {
        let res = warp::test::request().path("/stock/AAPL").remote_addr(first).reply(&api).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = warp::test::request().path("/stock/AAPL").remote_addr(first).reply(&api).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body, json!({"error": "Too many requests"}));

    let res = warp::test::request().path("/stock/AAPL").remote_addr(second).reply(&api).await;
    assert_eq!(res.status(), StatusCode::OK);

    // The history route has its own per-minute budget.
    let res = warp::test::request()
        .path("/stock/history/AAPL")
        .remote_addr(first)
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn hourly_quota_is_shared_across_routes() {
    let client = Arc::new(StubClient::default().with("AAPL", aapl_single_bar()));
    let limits = RateLimitConfig {
        per_day: 200,
        per_hour: 3,
        per_route_minute: 10,
    };
    let api = routes(cache_for(&client), limits_from(limits));
    let addr: SocketAddr = ([10, 0, 0, 3], 40000).into();

    for path in ["/", "/stock/AAPL", "/stock/history/AAPL"] {
        let res = warp::test::request().path(path).remote_addr(addr).reply(&api).await;
        assert_eq!(res.status(), StatusCode::OK, "{path}");
    }
    let res = warp::test::request().path("/").remote_addr(addr).reply(&api).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn unknown_paths_and_methods() {
    let client = Arc::new(StubClient::default());
    let api = routes(cache_for(&client), limits_from(UNLIMITED));

    let (status, body) = get(&api, "/predict/AAPL").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "Not Found"}));

    let res = warp::test::request().method("POST").path("/stock/AAPL").reply(&api).await;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
}
