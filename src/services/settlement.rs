//! Settlement: atomic cash-and-share transfer for a single fill.
//!
//! Runs inside the matching engine's transaction. Each step is a plain row
//! mutation; the schema's CHECK constraints reject overdrafts and negative
//! positions, so a violating step aborts the whole transaction. The engine's
//! pre-checks should make that impossible; when it happens anyway it surfaces
//! as `SettlementFailed` rather than being retried.

use sqlx::SqliteConnection;

use crate::db;
use crate::models::{OrderStatus, Trade};
use crate::services::matching::{ExchangeError, Fill};
use crate::utils::money::to_cents;

/// Execute one fill: buyer pays, seller is paid, shares move, both order rows
/// advance, and the trade row is appended.
pub async fn apply_fill(
    conn: &mut SqliteConnection,
    fill: &Fill,
    taker_order_id: uuid::Uuid,
    taker_remaining_after: i64,
    taker_status_after: OrderStatus,
) -> Result<(), ExchangeError> {
    let price_cents = to_cents(fill.price)
        .filter(|c| *c > 0)
        .ok_or_else(|| ExchangeError::SettlementFailed("fill price not cent-aligned".into()))?;
    let cost_cents = price_cents
        .checked_mul(fill.quantity)
        .ok_or_else(|| ExchangeError::SettlementFailed("fill value overflow".into()))?;

    // 1-2. Cash legs. The buyer debit trips the cash_cents >= 0 CHECK on
    // overdraft. For a self-trade both legs hit the same row and net out.
    db::adjust_cash(conn, fill.buyer_id, -cost_cents)
        .await
        .map_err(settlement_error)?;
    db::adjust_cash(conn, fill.seller_id, cost_cents)
        .await
        .map_err(settlement_error)?;

    // 3. Buyer receives shares.
    db::add_to_holding(conn, fill.buyer_id, &fill.ticker, fill.quantity)
        .await
        .map_err(settlement_error)?;

    // 4. Seller gives shares up; the row is deleted when it reaches zero.
    let seller_qty = db::holding_quantity(conn, fill.seller_id, &fill.ticker).await?;
    if seller_qty < fill.quantity {
        return Err(ExchangeError::SettlementFailed(format!(
            "seller holds {} of {}, fill needs {}",
            seller_qty, fill.ticker, fill.quantity
        )));
    }
    db::set_holding(conn, fill.seller_id, &fill.ticker, seller_qty - fill.quantity)
        .await
        .map_err(settlement_error)?;

    // 5. Advance both order rows.
    let maker_status = if fill.maker_remaining_after == 0 {
        OrderStatus::Filled
    } else {
        OrderStatus::Partial
    };
    db::update_order_progress(conn, fill.maker_order_id, fill.maker_remaining_after, maker_status)
        .await
        .map_err(settlement_error)?;
    db::update_order_progress(conn, taker_order_id, taker_remaining_after, taker_status_after)
        .await
        .map_err(settlement_error)?;

    // 6. Append the trade.
    let trade = Trade {
        id: fill.trade_id,
        ticker: fill.ticker.clone(),
        price: fill.price,
        quantity: fill.quantity,
        buyer_id: fill.buyer_id,
        seller_id: fill.seller_id,
        buy_order_id: fill.buy_order_id,
        sell_order_id: fill.sell_order_id,
        executed_at: fill.executed_at,
    };
    db::insert_trade(conn, &trade)
        .await
        .map_err(settlement_error)?;

    Ok(())
}

/// Constraint violations are settlement bugs; everything else is a store
/// failure handled by the engine's retry policy.
fn settlement_error(err: sqlx::Error) -> ExchangeError {
    match &err {
        sqlx::Error::Database(db_err)
            if matches!(
                db_err.kind(),
                sqlx::error::ErrorKind::CheckViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
            ) =>
        {
            ExchangeError::SettlementFailed(err.to_string())
        }
        _ => ExchangeError::Store(err),
    }
}
