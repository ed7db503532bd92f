//! Persistent store.
//!
//! SQLite is the single source of truth; the in-memory order book is a
//! rebuildable index on top of it. Money is stored as integer cents, share
//! counts as integers, timestamps as epoch millis and ids as UUID text.
//! CHECK constraints back the non-negativity invariants so a violating
//! settlement step aborts its transaction instead of persisting bad state.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{Account, Company, Holding, Order, OrderSide, OrderStatus, OrderType, Trade};
use crate::utils::money::from_cents;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS companies (
        ticker        TEXT PRIMARY KEY,
        name          TEXT NOT NULL,
        total_shares  INTEGER NOT NULL CHECK (total_shares > 0),
        float_shares  INTEGER NOT NULL CHECK (float_shares >= 0 AND float_shares <= total_shares),
        ipo_cents     INTEGER CHECK (ipo_cents IS NULL OR ipo_cents > 0),
        created_at    INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS accounts (
        id            TEXT PRIMARY KEY,
        cash_cents    INTEGER NOT NULL CHECK (cash_cents >= 0),
        api_key_hash  TEXT NOT NULL UNIQUE,
        is_treasury   INTEGER NOT NULL DEFAULT 0,
        created_at    INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS holdings (
        account_id    TEXT NOT NULL REFERENCES accounts(id),
        ticker        TEXT NOT NULL REFERENCES companies(ticker),
        quantity      INTEGER NOT NULL CHECK (quantity > 0),
        PRIMARY KEY (account_id, ticker)
    )",
    "CREATE TABLE IF NOT EXISTS orders (
        id            TEXT PRIMARY KEY,
        account_id    TEXT NOT NULL REFERENCES accounts(id),
        ticker        TEXT NOT NULL REFERENCES companies(ticker),
        side          TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
        order_type    TEXT NOT NULL CHECK (order_type IN ('LIMIT', 'MARKET')),
        price_cents   INTEGER CHECK (price_cents IS NULL OR price_cents > 0),
        quantity      INTEGER NOT NULL CHECK (quantity > 0),
        remaining     INTEGER NOT NULL CHECK (remaining >= 0 AND remaining <= quantity),
        status        TEXT NOT NULL CHECK (status IN ('OPEN', 'PARTIAL', 'FILLED', 'CANCELLED')),
        created_at    INTEGER NOT NULL,
        seq           INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_orders_book
        ON orders (ticker, status, side, price_cents, seq)",
    "CREATE INDEX IF NOT EXISTS idx_orders_account ON orders (account_id, seq)",
    "CREATE TABLE IF NOT EXISTS trades (
        id            TEXT PRIMARY KEY,
        ticker        TEXT NOT NULL REFERENCES companies(ticker),
        price_cents   INTEGER NOT NULL CHECK (price_cents > 0),
        quantity      INTEGER NOT NULL CHECK (quantity > 0),
        buyer_id      TEXT NOT NULL,
        seller_id     TEXT NOT NULL,
        buy_order_id  TEXT NOT NULL REFERENCES orders(id),
        sell_order_id TEXT NOT NULL REFERENCES orders(id),
        executed_at   INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_trades_ticker_time
        ON trades (ticker, executed_at DESC)",
];

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

/// 24h aggregate over the trades table, all prices in cents.
#[derive(Debug, Clone, Copy, Default)]
pub struct DayStats {
    pub volume: i64,
    pub high_cents: Option<i64>,
    pub low_cents: Option<i64>,
    pub open_cents: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ExchangeStats {
    pub companies: i64,
    pub accounts: i64,
    pub orders: i64,
    pub open_orders: i64,
    pub trades: i64,
    pub total_cash: rust_decimal::Decimal,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        // WAL lets per-ticker submits commit concurrently; the busy timeout
        // makes a second committer wait out the writer lock instead of
        // failing with SQLITE_BUSY.
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Single-connection in-memory database for tests.
    pub async fn connect_in_memory() -> Result<Self, sqlx::Error> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read views (pool-level)
    // ------------------------------------------------------------------

    pub async fn company(&self, ticker: &str) -> Result<Option<Company>, sqlx::Error> {
        sqlx::query("SELECT * FROM companies WHERE ticker = ?")
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| company_from_row(&row))
            .transpose()
    }

    pub async fn companies(&self) -> Result<Vec<Company>, sqlx::Error> {
        sqlx::query("SELECT * FROM companies ORDER BY ticker")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(company_from_row)
            .collect()
    }

    pub async fn account(&self, id: Uuid) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| account_from_row(&row))
            .transpose()
    }

    pub async fn accounts(&self) -> Result<Vec<Account>, sqlx::Error> {
        sqlx::query("SELECT * FROM accounts ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(account_from_row)
            .collect()
    }

    pub async fn account_id_by_key_hash(&self, hash: &str) -> Result<Option<Uuid>, sqlx::Error> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM accounts WHERE api_key_hash = ?")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
        id.as_deref().map(parse_uuid).transpose()
    }

    pub async fn holdings_for_account(&self, account_id: Uuid) -> Result<Vec<Holding>, sqlx::Error> {
        sqlx::query("SELECT * FROM holdings WHERE account_id = ? ORDER BY ticker")
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(holding_from_row)
            .collect()
    }

    pub async fn holding(&self, account_id: Uuid, ticker: &str) -> Result<i64, sqlx::Error> {
        let qty: Option<i64> =
            sqlx::query_scalar("SELECT quantity FROM holdings WHERE account_id = ? AND ticker = ?")
                .bind(account_id.to_string())
                .bind(ticker)
                .fetch_optional(&self.pool)
                .await?;
        Ok(qty.unwrap_or(0))
    }

    pub async fn order(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| order_from_row(&row))
            .transpose()
    }

    pub async fn orders_for_account(
        &self,
        account_id: Uuid,
        status: Option<OrderStatus>,
        ticker: Option<&str>,
    ) -> Result<Vec<Order>, sqlx::Error> {
        let mut sql = String::from("SELECT * FROM orders WHERE account_id = ?");
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if ticker.is_some() {
            sql.push_str(" AND ticker = ?");
        }
        sql.push_str(" ORDER BY seq DESC");

        let mut query = sqlx::query(&sql).bind(account_id.to_string());
        if let Some(status) = status {
            query = query.bind(status.to_string());
        }
        if let Some(ticker) = ticker {
            query = query.bind(ticker);
        }
        query
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(order_from_row)
            .collect()
    }

    /// All OPEN/PARTIAL orders in book priority order, for startup rebuild.
    pub async fn resting_orders(&self) -> Result<Vec<Order>, sqlx::Error> {
        sqlx::query(
            "SELECT * FROM orders WHERE status IN ('OPEN', 'PARTIAL') ORDER BY ticker, seq",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(order_from_row)
        .collect()
    }

    pub async fn trades_for_ticker(
        &self,
        ticker: &str,
        limit: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Trade>, sqlx::Error> {
        let mut sql = String::from("SELECT * FROM trades WHERE ticker = ?");
        if since.is_some() {
            sql.push_str(" AND executed_at >= ?");
        }
        sql.push_str(" ORDER BY executed_at DESC, rowid DESC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(ticker);
        if let Some(since) = since {
            query = query.bind(since.timestamp_millis());
        }
        query
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(trade_from_row)
            .collect()
    }

    pub async fn last_trade_cents(&self, ticker: &str) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT price_cents FROM trades WHERE ticker = ?
             ORDER BY executed_at DESC, rowid DESC LIMIT 1",
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn day_stats(&self, ticker: &str, since_ms: i64) -> Result<DayStats, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(quantity), 0) AS volume,
                    MAX(price_cents) AS high, MIN(price_cents) AS low
             FROM trades WHERE ticker = ? AND executed_at >= ?",
        )
        .bind(ticker)
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await?;

        let open_cents: Option<i64> = sqlx::query_scalar(
            "SELECT price_cents FROM trades WHERE ticker = ? AND executed_at >= ?
             ORDER BY executed_at ASC, rowid ASC LIMIT 1",
        )
        .bind(ticker)
        .bind(since_ms)
        .fetch_optional(&self.pool)
        .await?;

        Ok(DayStats {
            volume: row.try_get("volume")?,
            high_cents: row.try_get("high")?,
            low_cents: row.try_get("low")?,
            open_cents,
        })
    }

    pub async fn max_order_seq(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM orders")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn exchange_stats(&self) -> Result<ExchangeStats, sqlx::Error> {
        let companies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies")
            .fetch_one(&self.pool)
            .await?;
        let accounts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;
        let orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        let open_orders: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status IN ('OPEN', 'PARTIAL')")
                .fetch_one(&self.pool)
                .await?;
        let trades: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trades")
            .fetch_one(&self.pool)
            .await?;
        let total_cents: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(cash_cents), 0) FROM accounts")
                .fetch_one(&self.pool)
                .await?;

        Ok(ExchangeStats {
            companies,
            accounts,
            orders,
            open_orders,
            trades,
            total_cash: from_cents(total_cents),
        })
    }
}

// ----------------------------------------------------------------------
// Transaction-scoped operations
// ----------------------------------------------------------------------

pub async fn insert_company(
    conn: &mut SqliteConnection,
    company: &Company,
    ipo_cents: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO companies (ticker, name, total_shares, float_shares, ipo_cents, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&company.ticker)
    .bind(&company.name)
    .bind(company.total_shares)
    .bind(company.float_shares)
    .bind(ipo_cents)
    .bind(company.created_at.timestamp_millis())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_company(
    conn: &mut SqliteConnection,
    ticker: &str,
) -> Result<Option<Company>, sqlx::Error> {
    sqlx::query("SELECT * FROM companies WHERE ticker = ?")
        .bind(ticker)
        .fetch_optional(conn)
        .await?
        .map(|row| company_from_row(&row))
        .transpose()
}

pub async fn insert_account(
    conn: &mut SqliteConnection,
    account: &Account,
    cash_cents: i64,
    api_key_hash: &str,
    is_treasury: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO accounts (id, cash_cents, api_key_hash, is_treasury, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(account.id.to_string())
    .bind(cash_cents)
    .bind(api_key_hash)
    .bind(is_treasury)
    .bind(account.created_at.timestamp_millis())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_account(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query("SELECT * FROM accounts WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?
        .map(|row| account_from_row(&row))
        .transpose()
}

/// Apply a signed cash delta. The `cash_cents >= 0` CHECK rejects overdrafts.
pub async fn adjust_cash(
    conn: &mut SqliteConnection,
    account_id: Uuid,
    delta_cents: i64,
) -> Result<(), sqlx::Error> {
    let result = sqlx::query("UPDATE accounts SET cash_cents = cash_cents + ? WHERE id = ?")
        .bind(delta_cents)
        .bind(account_id.to_string())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

pub async fn holding_quantity(
    conn: &mut SqliteConnection,
    account_id: Uuid,
    ticker: &str,
) -> Result<i64, sqlx::Error> {
    let qty: Option<i64> =
        sqlx::query_scalar("SELECT quantity FROM holdings WHERE account_id = ? AND ticker = ?")
            .bind(account_id.to_string())
            .bind(ticker)
            .fetch_optional(conn)
            .await?;
    Ok(qty.unwrap_or(0))
}

pub async fn add_to_holding(
    conn: &mut SqliteConnection,
    account_id: Uuid,
    ticker: &str,
    quantity: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO holdings (account_id, ticker, quantity) VALUES (?, ?, ?)
         ON CONFLICT (account_id, ticker)
         DO UPDATE SET quantity = quantity + excluded.quantity",
    )
    .bind(account_id.to_string())
    .bind(ticker)
    .bind(quantity)
    .execute(conn)
    .await?;
    Ok(())
}

/// Set a holding to an exact quantity; zero deletes the row.
pub async fn set_holding(
    conn: &mut SqliteConnection,
    account_id: Uuid,
    ticker: &str,
    quantity: i64,
) -> Result<(), sqlx::Error> {
    if quantity == 0 {
        sqlx::query("DELETE FROM holdings WHERE account_id = ? AND ticker = ?")
            .bind(account_id.to_string())
            .bind(ticker)
            .execute(conn)
            .await?;
    } else {
        sqlx::query("UPDATE holdings SET quantity = ? WHERE account_id = ? AND ticker = ?")
            .bind(quantity)
            .bind(account_id.to_string())
            .bind(ticker)
            .execute(conn)
            .await?;
    }
    Ok(())
}

pub async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> Result<(), sqlx::Error> {
    let price_cents = order
        .price
        .and_then(crate::utils::money::to_cents);
    sqlx::query(
        "INSERT INTO orders
            (id, account_id, ticker, side, order_type, price_cents,
             quantity, remaining, status, created_at, seq)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(order.id.to_string())
    .bind(order.account_id.to_string())
    .bind(&order.ticker)
    .bind(order.side.to_string())
    .bind(order.order_type.to_string())
    .bind(price_cents)
    .bind(order.quantity)
    .bind(order.remaining_quantity)
    .bind(order.status.to_string())
    .bind(order.created_at.timestamp_millis())
    .bind(order.seq)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_order(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query("SELECT * FROM orders WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?
        .map(|row| order_from_row(&row))
        .transpose()
}

pub async fn update_order_progress(
    conn: &mut SqliteConnection,
    id: Uuid,
    remaining: i64,
    status: OrderStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE orders SET remaining = ?, status = ? WHERE id = ?")
        .bind(remaining)
        .bind(status.to_string())
        .bind(id.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_trade(conn: &mut SqliteConnection, trade: &Trade) -> Result<(), sqlx::Error> {
    let price_cents = crate::utils::money::to_cents(trade.price)
        .ok_or_else(|| decode_err("trade price is not cent-aligned"))?;
    sqlx::query(
        "INSERT INTO trades
            (id, ticker, price_cents, quantity, buyer_id, seller_id,
             buy_order_id, sell_order_id, executed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(trade.id.to_string())
    .bind(&trade.ticker)
    .bind(price_cents)
    .bind(trade.quantity)
    .bind(trade.buyer_id.to_string())
    .bind(trade.seller_id.to_string())
    .bind(trade.buy_order_id.to_string())
    .bind(trade.sell_order_id.to_string())
    .bind(trade.executed_at.timestamp_millis())
    .execute(conn)
    .await?;
    Ok(())
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

fn decode_err(msg: &str) -> sqlx::Error {
    sqlx::Error::Decode(msg.to_string().into())
}

fn parse_uuid(s: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(s).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn company_from_row(row: &SqliteRow) -> Result<Company, sqlx::Error> {
    let ipo_cents: Option<i64> = row.try_get("ipo_cents")?;
    Ok(Company {
        ticker: row.try_get("ticker")?,
        name: row.try_get("name")?,
        total_shares: row.try_get("total_shares")?,
        float_shares: row.try_get("float_shares")?,
        ipo_price: ipo_cents.map(from_cents),
        created_at: millis_to_datetime(row.try_get("created_at")?),
    })
}

fn account_from_row(row: &SqliteRow) -> Result<Account, sqlx::Error> {
    let id: String = row.try_get("id")?;
    Ok(Account {
        id: parse_uuid(&id)?,
        cash_balance: from_cents(row.try_get("cash_cents")?),
        created_at: millis_to_datetime(row.try_get("created_at")?),
    })
}

fn holding_from_row(row: &SqliteRow) -> Result<Holding, sqlx::Error> {
    let account_id: String = row.try_get("account_id")?;
    Ok(Holding {
        account_id: parse_uuid(&account_id)?,
        ticker: row.try_get("ticker")?,
        quantity: row.try_get("quantity")?,
    })
}

fn order_from_row(row: &SqliteRow) -> Result<Order, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let account_id: String = row.try_get("account_id")?;
    let side: String = row.try_get("side")?;
    let order_type: String = row.try_get("order_type")?;
    let status: String = row.try_get("status")?;
    let price_cents: Option<i64> = row.try_get("price_cents")?;

    Ok(Order {
        id: parse_uuid(&id)?,
        account_id: parse_uuid(&account_id)?,
        ticker: row.try_get("ticker")?,
        side: OrderSide::from_str(&side).map_err(|e| decode_err(&e))?,
        order_type: OrderType::from_str(&order_type).map_err(|e| decode_err(&e))?,
        price: price_cents.map(from_cents),
        quantity: row.try_get("quantity")?,
        remaining_quantity: row.try_get("remaining")?,
        status: OrderStatus::from_str(&status).map_err(|e| decode_err(&e))?,
        created_at: millis_to_datetime(row.try_get("created_at")?),
        seq: row.try_get("seq")?,
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<Trade, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let buyer_id: String = row.try_get("buyer_id")?;
    let seller_id: String = row.try_get("seller_id")?;
    let buy_order_id: String = row.try_get("buy_order_id")?;
    let sell_order_id: String = row.try_get("sell_order_id")?;

    Ok(Trade {
        id: parse_uuid(&id)?,
        ticker: row.try_get("ticker")?,
        price: from_cents(row.try_get("price_cents")?),
        quantity: row.try_get("quantity")?,
        buyer_id: parse_uuid(&buyer_id)?,
        seller_id: parse_uuid(&seller_id)?,
        buy_order_id: parse_uuid(&buy_order_id)?,
        sell_order_id: parse_uuid(&sell_order_id)?,
        executed_at: millis_to_datetime(row.try_get("executed_at")?),
    })
}
