use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An executed trade. Append-only; never modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub ticker: String,
    pub price: Decimal,
    pub quantity: i64,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDto {
    pub id: Uuid,
    pub ticker: String,
    pub price: Decimal,
    pub quantity: i64,
    pub executed_at: DateTime<Utc>,
}

impl From<Trade> for TradeDto {
    fn from(trade: Trade) -> Self {
        Self {
            id: trade.id,
            ticker: trade.ticker,
            price: trade.price,
            quantity: trade.quantity,
            executed_at: trade.executed_at,
        }
    }
}
