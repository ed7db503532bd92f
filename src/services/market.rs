//! Market data read views.
//!
//! Served from the store with the live best bid/ask mixed in from the
//! in-memory book. Read-only; never takes a ticker write lock.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::services::matching::{ExchangeError, MatchingEngine};
use crate::utils::money::from_cents;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub ticker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_pct_24h: Option<Decimal>,
    pub volume_24h: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_24h: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_24h: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_bid: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_ask: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

pub async fn market_data(
    db: &Database,
    engine: &MatchingEngine,
    ticker: &str,
) -> Result<MarketData, ExchangeError> {
    let company = db
        .company(ticker)
        .await?
        .ok_or_else(|| ExchangeError::UnknownTicker(ticker.to_string()))?;

    let now = Utc::now();
    let since_ms = (now - Duration::hours(24)).timestamp_millis();
    let stats = db.day_stats(ticker, since_ms).await?;
    let last_price = db.last_trade_cents(ticker).await?.map(from_cents);

    let change_pct_24h = match (last_price, stats.open_cents.map(from_cents)) {
        (Some(last), Some(open)) if !open.is_zero() => {
            Some(((last - open) / open * Decimal::from(100)).round_dp(2))
        }
        _ => None,
    };
    let market_cap = last_price.map(|p| p * Decimal::from(company.total_shares));
    let (best_bid, best_ask) = engine.quotes(ticker);

    Ok(MarketData {
        ticker: ticker.to_string(),
        last_price,
        change_pct_24h,
        volume_24h: stats.volume,
        high_24h: stats.high_cents.map(from_cents),
        low_24h: stats.low_cents.map(from_cents),
        market_cap,
        best_bid,
        best_ask,
        timestamp: now,
    })
}

pub async fn all_market_data(
    db: &Database,
    engine: &MatchingEngine,
) -> Result<Vec<MarketData>, ExchangeError> {
    let mut out = Vec::new();
    for company in db.companies().await? {
        out.push(market_data(db, engine, &company.ticker).await?);
    }
    Ok(out)
}
