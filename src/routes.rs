// src/routes.rs
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use log::{debug, info, warn};
use warp::http::StatusCode;
use warp::reject::Rejection;
use warp::{Filter, Reply};

use crate::handlers::error::ApiError;
use crate::handlers::stock::{get_home, get_stock_history, get_stock_price};
use crate::models::HistoryQuery;
use crate::services::cache::PriceCache;
use crate::services::rate_limit::{RateLimits, Route};

// Maps rejections to `{"error": message}` bodies.
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let code;
    let message: String;

    if let Some(api_error) = err.find::<ApiError>() {
        code = api_error.status_code();
        message = api_error.to_string();
    } else if err.is_not_found() {
        code = StatusCode::NOT_FOUND;
        message = "Not Found".to_string();
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = StatusCode::METHOD_NOT_ALLOWED;
        message = "Method Not Allowed".to_string();
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        code = StatusCode::BAD_REQUEST;
        message = "Invalid query string".to_string();
    } else {
        warn!("Unhandled rejection: {:?}", err);
        code = StatusCode::INTERNAL_SERVER_ERROR;
        message = "Internal server error".to_string();
    }

    debug!("Responding {} with error: {}", code, message);
    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "error": message,
        })),
        code,
    ))
}

/// Rejects with `ApiError::RateLimited` once the caller's quota is spent.
/// Requests without a known peer address share the loopback bucket.
fn with_rate_limit(
    limits: Arc<RateLimits>,
    route: Route,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::addr::remote()
        .and_then(move |addr: Option<SocketAddr>| {
            let limits = limits.clone();
            async move {
                let client = addr
                    .map(|a| a.ip())
                    .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
                if limits.check(route, client) {
                    Ok(())
                } else {
                    warn!("Rate limit exceeded for {} on {:?}", client, route);
                    Err(warp::reject::custom(ApiError::RateLimited))
                }
            }
        })
        .untuple_one()
}

pub fn routes(
    cache: Arc<PriceCache>,
    limits: Arc<RateLimits>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    info!("Configuring routes...");

    let cache_filter = warp::any().map(move || cache.clone());

    let home_route = warp::path::end()
        .and(warp::get())
        .and(with_rate_limit(limits.clone(), Route::Home))
        .and_then(get_home);

    let price_route = warp::path!("stock" / String)
        .and(warp::get())
        .and(with_rate_limit(limits.clone(), Route::Price))
        .and(cache_filter.clone())
        .and_then(get_stock_price);

    let history_route = warp::path!("stock" / "history" / String)
        .and(warp::get())
        .and(with_rate_limit(limits, Route::History))
        .and(warp::query::<HistoryQuery>())
        .and(cache_filter)
        .and_then(get_stock_history);

    info!("All routes configured successfully.");

    home_route
        .or(price_route)
        .or(history_route)
        .recover(handle_rejection)
}
