// src/config.rs
use std::time::Duration;

use thiserror::Error;

use crate::services::cache::DEFAULT_CAPACITY;
use crate::services::market_data::DEFAULT_YAHOO_BASE_URL;
use crate::services::rate_limit::RateLimitConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub debug: bool,
    /// Seconds after which a cached series is refetched; `0` disables expiry.
    pub cache_timeout: u64,
    pub cache_capacity: usize,
    pub port: u16,
    pub yahoo_base_url: String,
    pub rate_limits: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: true,
            cache_timeout: 3600,
            cache_capacity: DEFAULT_CAPACITY,
            port: 5000,
            yahoo_base_url: DEFAULT_YAHOO_BASE_URL.to_string(),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let debug = lookup("FLASK_DEBUG").map_or(defaults.debug, |v| v == "True");
        let cache_timeout = parse_or(&lookup, "CACHE_TIMEOUT", defaults.cache_timeout)?;
        let cache_capacity = parse_or(&lookup, "CACHE_CAPACITY", defaults.cache_capacity)?.max(1);
        let port = parse_or(&lookup, "PORT", defaults.port)?;
        let yahoo_base_url = lookup("YAHOO_BASE_URL").unwrap_or(defaults.yahoo_base_url);

        Ok(Config {
            debug,
            cache_timeout,
            cache_capacity,
            port,
            yahoo_base_url,
            rate_limits: defaults.rate_limits,
        })
    }

    pub fn cache_max_age(&self) -> Option<Duration> {
        match self.cache_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn default_log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}
