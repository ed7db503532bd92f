//! Environment-driven configuration for both services.
//!
//! Each service reads its own env prefix (`EXCHANGE_*`, `AGENTS_*`) on top of
//! compiled defaults, so a bare `cargo run` works out of the box.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl ExchangeConfig {
    pub fn load() -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .set_default("port", 8080_i64)?
            .set_default("database_url", "sqlite://exchange.db")?
            .set_default("admin_token", "admin-dev-token")?
            .set_default("rate_limit_max_requests", 120_i64)?
            .set_default("rate_limit_window_secs", 60_i64)?
            .add_source(config::Environment::with_prefix("EXCHANGE"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentPlatformConfig {
    pub port: u16,
    pub exchange_url: String,
    /// Upper bound on tickers evaluated per tick for `ticker: all` rules.
    pub max_tickers_per_tick: usize,
    /// Hard timeout after which an in-flight tick is abandoned.
    pub tick_timeout_secs: u64,
}

impl AgentPlatformConfig {
    pub fn load() -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .set_default("port", 8081_i64)?
            .set_default("exchange_url", "http://127.0.0.1:8080")?
            .set_default("max_tickers_per_tick", 64_i64)?
            .set_default("tick_timeout_secs", 30_i64)?
            .add_source(config::Environment::with_prefix("AGENTS"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}
