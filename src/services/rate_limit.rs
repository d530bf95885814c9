// src/services/rate_limit.rs
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use log::debug;
use tokio::task::JoinHandle;

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const MINUTE: Duration = Duration::from_secs(60);

/// Request quotas per client address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_day: u32,
    pub per_hour: u32,
    pub per_route_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_day: 200,
            per_hour: 50,
            per_route_minute: 10,
        }
    }
}

/// Quotas shared by every route, keyed by client address.
pub struct GlobalLimits {
    daily: KeyedLimiter,
    hourly: KeyedLimiter,
}

impl GlobalLimits {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            daily: RateLimiter::keyed(quota_from_window(DAY, config.per_day)),
            hourly: RateLimiter::keyed(quota_from_window(HOUR, config.per_hour)),
        }
    }

    pub fn check(&self, client: IpAddr) -> bool {
        self.daily.check_key(&client).is_ok() && self.hourly.check_key(&client).is_ok()
    }

    /// Drops clients whose quota has fully replenished.
    pub fn retain_recent(&self) {
        for limiter in [&self.daily, &self.hourly] {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    pub fn len(&self) -> usize {
        self.daily.len().max(self.hourly.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-route quota, keyed by client address.
pub struct RouteLimit {
    limiter: KeyedLimiter,
}

impl RouteLimit {
    pub fn per_minute(limit: u32) -> Self {
        Self::with_window(MINUTE, limit)
    }

    pub fn with_window(window: Duration, limit: u32) -> Self {
        Self {
            limiter: RateLimiter::keyed(quota_from_window(window, limit)),
        }
    }

    pub fn check(&self, client: IpAddr) -> bool {
        self.limiter.check_key(&client).is_ok()
    }

    /// Drops clients whose quota has fully replenished.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
    Price,
    History,
}

/// All limiters the API applies, one shared instance per server.
pub struct RateLimits {
    global: GlobalLimits,
    price: RouteLimit,
    history: RouteLimit,
}

impl RateLimits {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            global: GlobalLimits::new(config),
            price: RouteLimit::per_minute(config.per_route_minute),
            history: RouteLimit::per_minute(config.per_route_minute),
        }
    }

    /// Global quotas are checked first, so a request refused by them does
    /// not spend the route's per-minute allowance.
    pub fn check(&self, route: Route, client: IpAddr) -> bool {
        if !self.global.check(client) {
            return false;
        }
        match route {
            Route::Home => true,
            Route::Price => self.price.check(client),
            Route::History => self.history.check(client),
        }
    }

    pub fn retain_recent(&self) {
        self.global.retain_recent();
        self.price.retain_recent();
        self.history.retain_recent();
    }

    /// Prunes idle client state every `every` until the runtime shuts down.
    pub fn spawn_pruner(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limits = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                limits.retain_recent();
                debug!("Pruned rate limiter state, {} clients tracked", limits.global.len());
            }
        })
    }
}

/// Spreads `limit` cells over `window` with the whole limit available as burst.
fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
    let period = (window / burst.get()).max(Duration::from_millis(1));

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
