use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A listed company. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub ticker: String,
    pub name: String,
    pub total_shares: i64,
    pub float_shares: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipo_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCompanyRequest {
    pub ticker: String,
    pub name: String,
    pub total_shares: i64,
    pub float_shares: i64,
    #[serde(default)]
    pub ipo_price: Option<Decimal>,
}

impl Company {
    /// Tickers are 1-8 uppercase ASCII letters.
    pub fn is_valid_ticker(ticker: &str) -> bool {
        !ticker.is_empty()
            && ticker.len() <= 8
            && ticker.chars().all(|c| c.is_ascii_uppercase())
    }
}
