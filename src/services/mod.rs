// src/services/mod.rs
pub mod cache;
pub mod forecast;
pub mod market_data;
pub mod rate_limit;
pub mod validation;
