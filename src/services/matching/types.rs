//! Matching engine types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use uuid::Uuid;

use crate::models::{Order, OrderSide};
use crate::utils::money::{from_cents, to_cents};

// ============================================================================
// Price Level
// ============================================================================

/// Price in integer cents, for exact ordering and level keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceLevel(i64);

impl PriceLevel {
    /// Create a PriceLevel from a decimal price. `None` if the price is not
    /// positive or not cent-aligned.
    pub fn from_decimal(price: Decimal) -> Option<Self> {
        match to_cents(price) {
            Some(cents) if cents > 0 => Some(PriceLevel(cents)),
            _ => None,
        }
    }

    pub fn from_cents(cents: i64) -> Self {
        PriceLevel(cents)
    }

    pub fn to_decimal(self) -> Decimal {
        from_cents(self.0)
    }

    pub fn cents(self) -> i64 {
        self.0
    }
}

impl Ord for PriceLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Book entries and snapshots
// ============================================================================

/// A resting order as held by the in-memory book.
#[derive(Debug, Clone)]
pub struct BookEntry {
    pub order_id: Uuid,
    pub account_id: Uuid,
    pub price: PriceLevel,
    pub remaining: i64,
    pub seq: i64,
}

impl BookEntry {
    pub fn from_order(order: &Order) -> Option<Self> {
        let price = order.price.and_then(PriceLevel::from_decimal)?;
        Some(Self {
            order_id: order.id,
            account_id: order.account_id,
            price,
            remaining: order.remaining_quantity,
            seq: order.seq,
        })
    }
}

/// One aggregated price level for public market data.
#[derive(Debug, Clone, Serialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: i64,
    pub orders: usize,
}

/// Aggregated top-of-book view.
#[derive(Debug, Clone, Serialize)]
pub struct BookSnapshot {
    pub ticker: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

/// Non-aggregated book view for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct BookOrderView {
    pub order_id: Uuid,
    pub account_id: Uuid,
    pub price: Decimal,
    pub remaining: i64,
    pub seq: i64,
}

// ============================================================================
// Fills and submit outcome
// ============================================================================

/// One fill produced while matching a submitted order.
#[derive(Debug, Clone)]
pub struct Fill {
    pub trade_id: Uuid,
    pub ticker: String,
    pub price: Decimal,
    pub quantity: i64,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    /// The resting side of this fill, for book maintenance.
    pub maker_order_id: Uuid,
    pub maker_side: OrderSide,
    pub maker_remaining_after: i64,
    pub executed_at: DateTime<Utc>,
}

/// Result of a submit: the final order row plus the fills it generated.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub order: Order,
    pub fills: Vec<Fill>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("unknown ticker: {0}")]
    UnknownTicker(String),

    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("insufficient shares: required {required}, available {available}")]
    InsufficientShares { required: i64, available: i64 },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("order belongs to a different account")]
    NotOwner,

    #[error("order {0} is no longer open")]
    NotCancellable(Uuid),

    #[error("ticker already listed: {0}")]
    DuplicateTicker(String),

    #[error("settlement failed: {0}")]
    SettlementFailed(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("corrupt store row: {0}")]
    Corrupt(String),
}
