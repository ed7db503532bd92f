use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A trading account. Cash changes only through settlement or admin seeding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub cash_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDto {
    pub id: Uuid,
    pub cash_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountDto {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            cash_balance: account.cash_balance,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub initial_cash: Decimal,
}

/// Returned once; the raw API key is never retrievable again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountResponse {
    pub id: Uuid,
    pub api_key: String,
    pub cash_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A share position. Zero-quantity rows are deleted, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub account_id: Uuid,
    pub ticker: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingDto {
    pub ticker: String,
    pub quantity: i64,
}

impl From<Holding> for HoldingDto {
    fn from(holding: Holding) -> Self {
        Self {
            ticker: holding.ticker,
            quantity: holding.quantity,
        }
    }
}
