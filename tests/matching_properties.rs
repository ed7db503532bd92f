//! Property tests: the global invariants hold after any random order stream.

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use stockex_backend::auth::api_key::{generate_api_key, hash_api_key};
use stockex_backend::db::{self, Database};
use stockex_backend::models::{
    Account, CreateCompanyRequest, CreateOrderRequest, Order, OrderSide, OrderStatus, OrderType,
};
use stockex_backend::services::matching::{ExchangeError, MatchingEngine, TREASURY_ACCOUNT_ID};
use stockex_backend::utils::money::{from_cents, to_cents};

const TICKER: &str = "PROP";
const TOTAL_SHARES: i64 = 10_000;
const TRADERS: usize = 3;
const TRADER_CASH: i64 = 10_000;

#[derive(Debug, Clone)]
enum Op {
    Submit {
        trader: usize,
        sell: bool,
        market: bool,
        quantity: i64,
        price_cents: i64,
    },
    Cancel {
        trader: usize,
        nth: usize,
    },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..TRADERS, any::<bool>(), any::<bool>(), 1..20i64, 800..1200i64).prop_map(
            |(trader, sell, market, quantity, price_cents)| Op::Submit {
                trader,
                sell,
                market,
                quantity,
                price_cents,
            }
        ),
        1 => (0..TRADERS, 0..8usize).prop_map(|(trader, nth)| Op::Cancel { trader, nth }),
    ]
}

async fn create_trader(engine: &MatchingEngine) -> Uuid {
    let account = Account {
        id: Uuid::new_v4(),
        cash_balance: Decimal::from(TRADER_CASH),
        created_at: Utc::now(),
    };
    let mut tx = engine.db().pool.begin().await.unwrap();
    db::insert_account(
        &mut tx,
        &account,
        to_cents(account.cash_balance).unwrap(),
        &hash_api_key(&generate_api_key()),
        false,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    account.id
}

async fn all_orders(engine: &MatchingEngine, accounts: &[Uuid]) -> Vec<Order> {
    let mut orders = Vec::new();
    for account in accounts.iter().chain([TREASURY_ACCOUNT_ID].iter()) {
        orders.extend(
            engine
                .db()
                .orders_for_account(*account, None, None)
                .await
                .unwrap(),
        );
    }
    orders
}

async fn check_invariants(engine: &MatchingEngine, traders: &[Uuid]) {
    // 1. Cash conservation: seeded trader cash, treasury started at zero.
    let stats = engine.db().exchange_stats().await.unwrap();
    assert_eq!(
        stats.total_cash,
        Decimal::from(TRADER_CASH * TRADERS as i64),
        "cash leaked"
    );

    // 2. Share conservation: shares only move between holdings rows.
    let mut shares = 0;
    for account in traders.iter().chain([TREASURY_ACCOUNT_ID].iter()) {
        let held = engine.db().holding(*account, TICKER).await.unwrap();
        assert!(held >= 0, "negative holding for {account}");
        shares += held;
    }
    assert_eq!(shares, TOTAL_SHARES, "shares leaked");

    // 3. No crossed book.
    let snapshot = engine.snapshot(TICKER, 1).unwrap();
    if let (Some(bid), Some(ask)) = (snapshot.bids.first(), snapshot.asks.first()) {
        assert!(bid.price < ask.price, "book is crossed: {bid:?} vs {ask:?}");
    }

    // 5. Non-negative cash.
    for account in engine.db().accounts().await.unwrap() {
        assert!(account.cash_balance >= Decimal::ZERO);
    }

    // 4. remaining = quantity - sum(fills), with status to match.
    let orders = all_orders(engine, traders).await;
    let trades = engine
        .db()
        .trades_for_ticker(TICKER, i64::MAX, None)
        .await
        .unwrap();
    for order in &orders {
        let filled: i64 = trades
            .iter()
            .filter(|t| t.buy_order_id == order.id || t.sell_order_id == order.id)
            .map(|t| t.quantity)
            .sum();
        assert_eq!(
            order.remaining_quantity,
            order.quantity - filled,
            "remaining mismatch for {}",
            order.id
        );
        match order.status {
            OrderStatus::Open => assert_eq!(filled, 0),
            OrderStatus::Partial => assert!(filled > 0 && order.remaining_quantity > 0),
            // A market order's residual is cancelled, not posted, so FILLED
            // only implies remaining = 0 for limit orders.
            OrderStatus::Filled => {
                if order.order_type == OrderType::Limit {
                    assert_eq!(order.remaining_quantity, 0);
                } else {
                    assert!(filled > 0);
                }
            }
            OrderStatus::Cancelled => {}
        }
    }

    // 6. Book <-> store consistency.
    let resting: HashSet<Uuid> = engine
        .db()
        .resting_orders()
        .await
        .unwrap()
        .iter()
        .map(|o| o.id)
        .collect();
    let (bids, asks) = engine.orders_view(TICKER).unwrap();
    let in_book: Vec<Uuid> = bids
        .iter()
        .chain(asks.iter())
        .map(|entry| entry.order_id)
        .collect();
    let book_set: HashSet<Uuid> = in_book.iter().copied().collect();
    assert_eq!(in_book.len(), book_set.len(), "order appears twice in book");
    assert_eq!(book_set, resting, "book diverged from store");
}

async fn run_stream(ops: Vec<Op>) {
    let database = Database::connect_in_memory().await.unwrap();
    let engine = Arc::new(MatchingEngine::new(database));
    engine.bootstrap().await.unwrap();

    engine
        .list_company(&CreateCompanyRequest {
            ticker: TICKER.to_string(),
            name: "Property Test Inc".to_string(),
            total_shares: TOTAL_SHARES,
            float_shares: 500,
            ipo_price: Some(dec!(10)),
        })
        .await
        .unwrap();

    let mut traders = Vec::new();
    for _ in 0..TRADERS {
        traders.push(create_trader(&engine).await);
    }

    for op in ops {
        match op {
            Op::Submit {
                trader,
                sell,
                market,
                quantity,
                price_cents,
            } => {
                let request = CreateOrderRequest {
                    ticker: TICKER.to_string(),
                    side: if sell { OrderSide::Sell } else { OrderSide::Buy },
                    order_type: if market {
                        OrderType::Market
                    } else {
                        OrderType::Limit
                    },
                    quantity,
                    price: (!market).then(|| from_cents(price_cents)),
                };
                match engine.submit(traders[trader], &request).await {
                    Ok(_) => {}
                    // Typed rejections and surfaced settlement bugs roll the
                    // whole submit back; state must stay consistent.
                    Err(ExchangeError::InsufficientFunds { .. })
                    | Err(ExchangeError::InsufficientShares { .. })
                    | Err(ExchangeError::SettlementFailed(_)) => {}
                    Err(other) => panic!("unexpected submit error: {other}"),
                }
            }
            Op::Cancel { trader, nth } => {
                let open = engine
                    .db()
                    .orders_for_account(traders[trader], Some(OrderStatus::Open), None)
                    .await
                    .unwrap();
                if open.is_empty() {
                    continue;
                }
                let target = &open[nth % open.len()];
                match engine.cancel(traders[trader], target.id, false).await {
                    Ok(_) | Err(ExchangeError::NotCancellable(_)) => {}
                    Err(other) => panic!("unexpected cancel error: {other}"),
                }
            }
        }
        check_invariants(&engine, &traders).await;
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        .. ProptestConfig::default()
    })]

    #[test]
    fn invariants_hold_over_random_order_streams(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(run_stream(ops));
    }
}
