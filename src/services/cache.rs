//! In-process memoizing cache for price series.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::Mutex;

use crate::models::{Period, PriceSeries};
use crate::services::market_data::{MarketDataClient, MarketDataError};

pub const DEFAULT_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub ticker: String,
    pub period: Period,
}

impl CacheKey {
    pub fn new(ticker: &str, period: Period) -> Self {
        Self {
            ticker: ticker.to_string(),
            period,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    series: Arc<PriceSeries>,
    fetched_at: Instant,
    last_used: u64,
}

#[derive(Debug)]
struct CacheInner {
    map: HashMap<CacheKey, CacheEntry>,
    capacity: usize,
    max_age: Option<Duration>,
    // Monotonic use counter; the smallest `last_used` is the LRU entry.
    clock: u64,
}

impl CacheInner {
    fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            capacity: capacity.max(1),
            max_age,
            clock: 0,
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<Arc<PriceSeries>> {
        let expired = match (self.map.get(key), self.max_age) {
            (None, _) => return None,
            (Some(entry), Some(max_age)) => entry.fetched_at.elapsed() > max_age,
            (Some(_), None) => false,
        };
        if expired {
            self.map.remove(key);
            return None;
        }

        self.clock += 1;
        let clock = self.clock;
        self.map.get_mut(key).map(|entry| {
            entry.last_used = clock;
            entry.series.clone()
        })
    }

    fn put(&mut self, key: CacheKey, series: Arc<PriceSeries>) {
        if !self.map.contains_key(&key) && self.map.len() >= self.capacity {
            self.evict_lru();
        }
        self.clock += 1;
        self.map.insert(
            key,
            CacheEntry {
                series,
                fetched_at: Instant::now(),
                last_used: self.clock,
            },
        );
    }

    fn evict_lru(&mut self) {
        let lru = self
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = lru {
            debug!("Evicting {} ({}) from price cache", key.ticker, key.period);
            self.map.remove(&key);
        }
    }
}

/// Bounded LRU cache in front of a [`MarketDataClient`].
///
/// Entries are keyed by the exact `(ticker, period)` pair. When `max_age`
/// is set, entries older than it are dropped on read. The lock is not held
/// across the upstream call, so concurrent misses on one key may each fetch.
pub struct PriceCache {
    client: Arc<dyn MarketDataClient>,
    inner: Mutex<CacheInner>,
}

impl PriceCache {
    pub fn new(
        client: Arc<dyn MarketDataClient>,
        capacity: usize,
        max_age: Option<Duration>,
    ) -> Self {
        Self {
            client,
            inner: Mutex::new(CacheInner::new(capacity, max_age)),
        }
    }

    pub async fn fetch(
        &self,
        ticker: &str,
        period: Period,
    ) -> Result<Arc<PriceSeries>, MarketDataError> {
        let key = CacheKey::new(ticker, period);

        if let Some(series) = self.inner.lock().await.get(&key) {
            debug!("Price cache hit for {} ({})", ticker, period);
            return Ok(series);
        }

        debug!("Price cache miss for {} ({})", ticker, period);
        let series = Arc::new(self.client.history(ticker, period).await?);
        self.inner.lock().await.put(key, series.clone());
        Ok(series)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.inner.lock().await.map.clear();
    }
}
