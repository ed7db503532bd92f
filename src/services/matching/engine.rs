//! Price-time-priority matching engine.
//!
//! One `TickerBook` per listed company: the in-memory book plus a write lock
//! serializing every mutation of that ticker. A submit runs entirely inside a
//! single store transaction while holding the lock; the book is only touched
//! after the commit, so it never diverges from the store. Different tickers
//! match in parallel.

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::book::Book;
use super::types::{
    BookEntry, BookOrderView, BookSnapshot, ExchangeError, Fill, PriceLevel, SubmitOutcome,
};
use crate::db::{self, Database};
use crate::models::{
    Company, CreateCompanyRequest, CreateOrderRequest, Order, OrderSide, OrderStatus, OrderType,
};
use crate::services::settlement;

/// Account owning each company's unfloated shares. Created at bootstrap.
pub const TREASURY_ACCOUNT_ID: Uuid = Uuid::nil();

pub struct TickerBook {
    write_lock: Mutex<()>,
    pub book: Book,
}

impl TickerBook {
    fn new() -> Self {
        Self {
            write_lock: Mutex::new(()),
            book: Book::new(),
        }
    }
}

pub struct MatchingEngine {
    db: Database,
    books: DashMap<String, Arc<TickerBook>>,
    seq: AtomicI64,
}

impl MatchingEngine {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            books: DashMap::new(),
            seq: AtomicI64::new(0),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Prepare the engine after process start: ensure the treasury account
    /// exists, restore the submission sequence, and rebuild the per-ticker
    /// books from OPEN/PARTIAL rows. Returns the number of restored orders.
    pub async fn bootstrap(&self) -> Result<usize, ExchangeError> {
        if self.db.account(TREASURY_ACCOUNT_ID).await?.is_none() {
            let treasury = crate::models::Account {
                id: TREASURY_ACCOUNT_ID,
                cash_balance: Decimal::ZERO,
                created_at: Utc::now(),
            };
            // The treasury trades only through the engine; its key is random
            // and never issued.
            let key_hash = crate::auth::api_key::hash_api_key(&crate::auth::api_key::generate_api_key());
            let mut tx = self.db.pool.begin().await?;
            db::insert_account(&mut tx, &treasury, 0, &key_hash, true).await?;
            tx.commit().await?;
            tracing::info!("treasury account created");
        }

        self.seq
            .store(self.db.max_order_seq().await?, Ordering::SeqCst);

        for company in self.db.companies().await? {
            self.ensure_book(&company.ticker);
        }

        let resting = self.db.resting_orders().await?;
        let count = resting.len();
        for order in resting {
            let entry = BookEntry::from_order(&order).ok_or_else(|| {
                ExchangeError::Corrupt(format!("resting order {} has no price", order.id))
            })?;
            self.ensure_book(&order.ticker).book.insert(order.side, entry);
        }
        Ok(count)
    }

    fn ensure_book(&self, ticker: &str) -> Arc<TickerBook> {
        self.books
            .entry(ticker.to_string())
            .or_insert_with(|| Arc::new(TickerBook::new()))
            .clone()
    }

    pub fn ticker_book(&self, ticker: &str) -> Option<Arc<TickerBook>> {
        self.books.get(ticker).map(|b| b.clone())
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ------------------------------------------------------------------
    // Company listing / IPO seeding
    // ------------------------------------------------------------------

    /// List a company. With an IPO price, the treasury immediately offers the
    /// float as a SELL-LIMIT through the normal submit path.
    pub async fn list_company(
        &self,
        req: &CreateCompanyRequest,
    ) -> Result<Company, ExchangeError> {
        if !Company::is_valid_ticker(&req.ticker) {
            return Err(ExchangeError::InvalidOrder(format!(
                "invalid ticker: {:?}",
                req.ticker
            )));
        }
        if req.name.trim().is_empty() {
            return Err(ExchangeError::InvalidOrder("company name is empty".into()));
        }
        if req.total_shares <= 0 {
            return Err(ExchangeError::InvalidOrder(
                "total_shares must be positive".into(),
            ));
        }
        if req.float_shares < 0 || req.float_shares > req.total_shares {
            return Err(ExchangeError::InvalidOrder(
                "float_shares must be within [0, total_shares]".into(),
            ));
        }
        let ipo_level = match req.ipo_price {
            None => None,
            Some(price) => Some(PriceLevel::from_decimal(price).ok_or_else(|| {
                ExchangeError::InvalidOrder("ipo_price must be positive with at most 2 decimals".into())
            })?),
        };

        let company = Company {
            ticker: req.ticker.clone(),
            name: req.name.clone(),
            total_shares: req.total_shares,
            float_shares: req.float_shares,
            ipo_price: ipo_level.map(PriceLevel::to_decimal),
            created_at: Utc::now(),
        };

        let mut tx = self.db.pool.begin().await?;
        if db::fetch_company(&mut tx, &company.ticker).await?.is_some() {
            return Err(ExchangeError::DuplicateTicker(company.ticker.clone()));
        }
        db::insert_company(&mut tx, &company, ipo_level.map(PriceLevel::cents)).await?;
        db::add_to_holding(&mut tx, TREASURY_ACCOUNT_ID, &company.ticker, company.total_shares)
            .await?;
        tx.commit().await?;

        self.ensure_book(&company.ticker);
        tracing::info!(
            ticker = %company.ticker,
            total = company.total_shares,
            float = company.float_shares,
            "company listed"
        );

        if let Some(level) = ipo_level {
            if company.float_shares > 0 {
                let ipo_order = CreateOrderRequest {
                    ticker: company.ticker.clone(),
                    side: OrderSide::Sell,
                    order_type: OrderType::Limit,
                    quantity: company.float_shares,
                    price: Some(level.to_decimal()),
                };
                let outcome = self.submit(TREASURY_ACCOUNT_ID, &ipo_order).await?;
                tracing::info!(
                    ticker = %company.ticker,
                    order_id = %outcome.order.id,
                    price = %level.to_decimal(),
                    quantity = company.float_shares,
                    "IPO float offered"
                );
            }
        }

        Ok(company)
    }

    // ------------------------------------------------------------------
    // Submit
    // ------------------------------------------------------------------

    fn validate_request(req: &CreateOrderRequest) -> Result<Option<PriceLevel>, ExchangeError> {
        if req.quantity <= 0 {
            return Err(ExchangeError::InvalidOrder(
                "quantity must be positive".into(),
            ));
        }
        match req.order_type {
            OrderType::Limit => {
                let price = req
                    .price
                    .ok_or_else(|| ExchangeError::InvalidOrder("LIMIT order requires a price".into()))?;
                let level = PriceLevel::from_decimal(price).ok_or_else(|| {
                    ExchangeError::InvalidOrder(
                        "price must be positive with at most 2 decimals".into(),
                    )
                })?;
                Ok(Some(level))
            }
            OrderType::Market => {
                if req.price.is_some() {
                    return Err(ExchangeError::InvalidOrder(
                        "MARKET order must not carry a price".into(),
                    ));
                }
                Ok(None)
            }
        }
    }

    /// Submit an order: validate, pre-check, match, settle and persist, all
    /// under the ticker's write lock. A transient store failure retries the
    /// whole transaction once.
    pub async fn submit(
        &self,
        account_id: Uuid,
        req: &CreateOrderRequest,
    ) -> Result<SubmitOutcome, ExchangeError> {
        let limit = Self::validate_request(req)?;
        let ticker_book = self
            .ticker_book(&req.ticker)
            .ok_or_else(|| ExchangeError::UnknownTicker(req.ticker.clone()))?;

        let _guard = ticker_book.write_lock.lock().await;
        match self.submit_locked(&ticker_book, account_id, req, limit).await {
            Err(ExchangeError::Store(err)) => {
                tracing::warn!(ticker = %req.ticker, "submit transaction failed, retrying once: {err}");
                self.submit_locked(&ticker_book, account_id, req, limit).await
            }
            other => other,
        }
    }

    async fn submit_locked(
        &self,
        ticker_book: &TickerBook,
        account_id: Uuid,
        req: &CreateOrderRequest,
        limit: Option<PriceLevel>,
    ) -> Result<SubmitOutcome, ExchangeError> {
        let mut tx = self.db.pool.begin().await?;

        let account = db::fetch_account(&mut tx, account_id)
            .await?
            .ok_or(ExchangeError::AccountNotFound(account_id))?;

        // Pre-checks: reject synchronously, nothing persisted.
        match (req.side, req.order_type) {
            (OrderSide::Sell, _) => {
                let held = db::holding_quantity(&mut tx, account_id, &req.ticker).await?;
                if held < req.quantity {
                    return Err(ExchangeError::InsufficientShares {
                        required: req.quantity,
                        available: held,
                    });
                }
            }
            (OrderSide::Buy, OrderType::Limit) => {
                let level = limit.unwrap_or(PriceLevel::from_cents(0));
                let required = level.to_decimal() * Decimal::from(req.quantity);
                if account.cash_balance < required {
                    return Err(ExchangeError::InsufficientFunds {
                        required,
                        available: account.cash_balance,
                    });
                }
            }
            // BUY-MARKET is checked per fill against the walking price.
            (OrderSide::Buy, OrderType::Market) => {}
        }

        let now = Utc::now();
        let mut order = Order {
            id: Uuid::new_v4(),
            account_id,
            ticker: req.ticker.clone(),
            side: req.side,
            order_type: req.order_type,
            price: limit.map(PriceLevel::to_decimal),
            quantity: req.quantity,
            remaining_quantity: req.quantity,
            status: OrderStatus::Open,
            created_at: now,
            seq: self.next_seq(),
        };
        db::insert_order(&mut tx, &order).await?;

        let candidates = ticker_book.book.matchable(req.side, limit, req.quantity);
        let mut fills: Vec<Fill> = Vec::new();
        let mut cash_available = account.cash_balance;

        for maker in candidates {
            if order.remaining_quantity == 0 {
                break;
            }
            let price = maker.price.to_decimal();

            // BUY-MARKET walks the book; every step requires the buyer to
            // cover the full remainder at the current best ask.
            if req.side == OrderSide::Buy && req.order_type == OrderType::Market {
                let required = price * Decimal::from(order.remaining_quantity);
                if cash_available < required {
                    return Err(ExchangeError::InsufficientFunds {
                        required,
                        available: cash_available,
                    });
                }
            }

            let quantity = order.remaining_quantity.min(maker.remaining);
            let (buyer_id, seller_id, buy_order_id, sell_order_id) = match req.side {
                OrderSide::Buy => (account_id, maker.account_id, order.id, maker.order_id),
                OrderSide::Sell => (maker.account_id, account_id, maker.order_id, order.id),
            };
            let remaining_after = order.remaining_quantity - quantity;
            let status_after = if remaining_after == 0 {
                OrderStatus::Filled
            } else {
                OrderStatus::Partial
            };

            let fill = Fill {
                trade_id: Uuid::new_v4(),
                ticker: req.ticker.clone(),
                price,
                quantity,
                buyer_id,
                seller_id,
                buy_order_id,
                sell_order_id,
                maker_order_id: maker.order_id,
                maker_side: req.side.opposite(),
                maker_remaining_after: maker.remaining - quantity,
                executed_at: now,
            };
            settlement::apply_fill(&mut tx, &fill, order.id, remaining_after, status_after).await?;

            order.remaining_quantity = remaining_after;
            order.status = status_after;
            let value = price * Decimal::from(quantity);
            match req.side {
                OrderSide::Buy => cash_available -= value,
                OrderSide::Sell => cash_available += value,
            }
            fills.push(fill);
        }

        let final_status = match req.order_type {
            // An unfilled market remainder is cancelled, never posted.
            OrderType::Market => {
                if fills.is_empty() {
                    OrderStatus::Cancelled
                } else {
                    OrderStatus::Filled
                }
            }
            OrderType::Limit => {
                if order.remaining_quantity == 0 {
                    OrderStatus::Filled
                } else if fills.is_empty() {
                    OrderStatus::Open
                } else {
                    OrderStatus::Partial
                }
            }
        };
        if final_status != order.status {
            db::update_order_progress(&mut tx, order.id, order.remaining_quantity, final_status)
                .await?;
        }
        order.status = final_status;

        tx.commit().await?;

        // Write-through to the in-memory index, post-commit only.
        for fill in &fills {
            ticker_book.book.reduce(fill.maker_order_id, fill.quantity);
        }
        if order.order_type == OrderType::Limit && !order.status.is_terminal() {
            if let Some(entry) = BookEntry::from_order(&order) {
                ticker_book.book.insert(order.side, entry);
            }
        }

        tracing::debug!(
            order_id = %order.id,
            ticker = %order.ticker,
            side = %order.side,
            status = %order.status,
            fills = fills.len(),
            "order submitted"
        );
        Ok(SubmitOutcome { order, fills })
    }

    // ------------------------------------------------------------------
    // Cancel
    // ------------------------------------------------------------------

    /// Cancel a resting order. Terminal orders conflict; foreign orders are
    /// forbidden unless `admin`.
    pub async fn cancel(
        &self,
        requester: Uuid,
        order_id: Uuid,
        admin: bool,
    ) -> Result<Order, ExchangeError> {
        let existing = self
            .db
            .order(order_id)
            .await?
            .ok_or(ExchangeError::OrderNotFound(order_id))?;
        if !admin && existing.account_id != requester {
            return Err(ExchangeError::NotOwner);
        }
        let ticker_book = self
            .ticker_book(&existing.ticker)
            .ok_or_else(|| ExchangeError::UnknownTicker(existing.ticker.clone()))?;

        let _guard = ticker_book.write_lock.lock().await;
        let mut tx = self.db.pool.begin().await?;
        let mut order = db::fetch_order(&mut tx, order_id)
            .await?
            .ok_or(ExchangeError::OrderNotFound(order_id))?;
        if order.status.is_terminal() {
            return Err(ExchangeError::NotCancellable(order_id));
        }
        db::update_order_progress(&mut tx, order_id, order.remaining_quantity, OrderStatus::Cancelled)
            .await?;
        tx.commit().await?;

        ticker_book.book.remove(order_id);
        order.status = OrderStatus::Cancelled;
        tracing::debug!(order_id = %order_id, ticker = %order.ticker, "order cancelled");
        Ok(order)
    }

    // ------------------------------------------------------------------
    // Read views
    // ------------------------------------------------------------------

    pub fn snapshot(&self, ticker: &str, depth: usize) -> Option<BookSnapshot> {
        let ticker_book = self.ticker_book(ticker)?;
        let (bids, asks) = ticker_book.book.aggregate(depth);
        Some(BookSnapshot {
            ticker: ticker.to_string(),
            bids,
            asks,
            timestamp: Utc::now(),
        })
    }

    pub fn orders_view(&self, ticker: &str) -> Option<(Vec<BookOrderView>, Vec<BookOrderView>)> {
        Some(self.ticker_book(ticker)?.book.orders_view())
    }

    /// Best bid/ask for market data, straight from the in-memory index.
    pub fn quotes(&self, ticker: &str) -> (Option<Decimal>, Option<Decimal>) {
        match self.ticker_book(ticker) {
            Some(tb) => (
                tb.book.best_bid().map(PriceLevel::to_decimal),
                tb.book.best_ask().map(PriceLevel::to_decimal),
            ),
            None => (None, None),
        }
    }
}
