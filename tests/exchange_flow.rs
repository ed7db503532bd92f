//! End-to-end matching and settlement scenarios against an in-memory store.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use stockex_backend::auth::api_key::{generate_api_key, hash_api_key};
use stockex_backend::db::{self, Database};
use stockex_backend::models::{
    Account, CreateCompanyRequest, CreateOrderRequest, OrderSide, OrderStatus, OrderType,
};
use stockex_backend::services::matching::{ExchangeError, MatchingEngine, TREASURY_ACCOUNT_ID};
use stockex_backend::utils::money::to_cents;

async fn engine() -> Arc<MatchingEngine> {
    let database = Database::connect_in_memory().await.unwrap();
    let engine = Arc::new(MatchingEngine::new(database));
    engine.bootstrap().await.unwrap();
    engine
}

async fn create_account(engine: &MatchingEngine, cash: Decimal) -> Uuid {
    let account = Account {
        id: Uuid::new_v4(),
        cash_balance: cash,
        created_at: Utc::now(),
    };
    let mut tx = engine.db().pool.begin().await.unwrap();
    db::insert_account(
        &mut tx,
        &account,
        to_cents(cash).unwrap(),
        &hash_api_key(&generate_api_key()),
        false,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    account.id
}

async fn list_company(
    engine: &MatchingEngine,
    ticker: &str,
    total: i64,
    float: i64,
    ipo: Option<Decimal>,
) {
    engine
        .list_company(&CreateCompanyRequest {
            ticker: ticker.to_string(),
            name: format!("{ticker} Inc"),
            total_shares: total,
            float_shares: float,
            ipo_price: ipo,
        })
        .await
        .unwrap();
}

fn order(ticker: &str, side: OrderSide, order_type: OrderType, quantity: i64, price: Option<Decimal>) -> CreateOrderRequest {
    CreateOrderRequest {
        ticker: ticker.to_string(),
        side,
        order_type,
        quantity,
        price,
    }
}

async fn total_cash(engine: &MatchingEngine) -> Decimal {
    engine.db().exchange_stats().await.unwrap().total_cash
}

#[tokio::test]
async fn simple_match_market_buy_against_ipo() {
    let engine = engine().await;
    list_company(&engine, "TECH", 1_000_000, 1_000, Some(dec!(100))).await;
    let alice = create_account(&engine, dec!(5000)).await;
    let cash_before = total_cash(&engine).await;

    let outcome = engine
        .submit(alice, &order("TECH", OrderSide::Buy, OrderType::Market, 10, None))
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Filled);
    assert_eq!(outcome.fills.len(), 1);
    assert_eq!(outcome.fills[0].price, dec!(100));
    assert_eq!(outcome.fills[0].quantity, 10);

    let alice_account = engine.db().account(alice).await.unwrap().unwrap();
    assert_eq!(alice_account.cash_balance, dec!(4000));
    assert_eq!(engine.db().holding(alice, "TECH").await.unwrap(), 10);
    assert_eq!(
        engine.db().holding(TREASURY_ACCOUNT_ID, "TECH").await.unwrap(),
        1_000_000 - 10
    );

    let treasury = engine.db().account(TREASURY_ACCOUNT_ID).await.unwrap().unwrap();
    assert_eq!(treasury.cash_balance, dec!(1000));

    let trades = engine.db().trades_for_ticker("TECH", 10, None).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].buyer_id, alice);
    assert_eq!(trades[0].seller_id, TREASURY_ACCOUNT_ID);

    // No fees, no external flows: cash only moved between accounts.
    assert_eq!(total_cash(&engine).await, cash_before);
}

#[tokio::test]
async fn partial_fill_rests_remainder() {
    let engine = engine().await;
    list_company(&engine, "CORP", 10_000, 100, Some(dec!(50))).await;
    let bob = create_account(&engine, dec!(10_000)).await;
    let alice = create_account(&engine, dec!(10_000)).await;

    // Bob takes the whole float so the book is empty again.
    engine
        .submit(bob, &order("CORP", OrderSide::Buy, OrderType::Market, 100, None))
        .await
        .unwrap();

    let bob_sell = engine
        .submit(bob, &order("CORP", OrderSide::Sell, OrderType::Limit, 50, Some(dec!(105))))
        .await
        .unwrap();
    assert_eq!(bob_sell.order.status, OrderStatus::Open);

    let alice_buy = engine
        .submit(alice, &order("CORP", OrderSide::Buy, OrderType::Limit, 80, Some(dec!(105))))
        .await
        .unwrap();

    assert_eq!(alice_buy.fills.len(), 1);
    assert_eq!(alice_buy.fills[0].quantity, 50);
    assert_eq!(alice_buy.fills[0].price, dec!(105));
    assert_eq!(alice_buy.order.status, OrderStatus::Partial);
    assert_eq!(alice_buy.order.remaining_quantity, 30);

    // Alice's remainder rests on the bid at 105.
    let snapshot = engine.snapshot("CORP", 10).unwrap();
    assert_eq!(snapshot.bids.len(), 1);
    assert_eq!(snapshot.bids[0].price, dec!(105));
    assert_eq!(snapshot.bids[0].quantity, 30);
    assert!(snapshot.asks.is_empty());

    let bob_order = engine.db().order(bob_sell.order.id).await.unwrap().unwrap();
    assert_eq!(bob_order.status, OrderStatus::Filled);
    assert_eq!(bob_order.remaining_quantity, 0);
}

#[tokio::test]
async fn price_time_priority_earlier_order_fills_first() {
    let engine = engine().await;
    list_company(&engine, "PTP", 10_000, 20, Some(dec!(10))).await;
    let carol = create_account(&engine, dec!(1000)).await;
    let dave = create_account(&engine, dec!(1000)).await;
    let alice = create_account(&engine, dec!(1000)).await;

    engine
        .submit(carol, &order("PTP", OrderSide::Buy, OrderType::Market, 10, None))
        .await
        .unwrap();
    engine
        .submit(dave, &order("PTP", OrderSide::Buy, OrderType::Market, 10, None))
        .await
        .unwrap();

    let first = engine
        .submit(carol, &order("PTP", OrderSide::Sell, OrderType::Limit, 5, Some(dec!(100))))
        .await
        .unwrap();
    let second = engine
        .submit(dave, &order("PTP", OrderSide::Sell, OrderType::Limit, 5, Some(dec!(100))))
        .await
        .unwrap();

    let taker = engine
        .submit(alice, &order("PTP", OrderSide::Buy, OrderType::Market, 5, None))
        .await
        .unwrap();

    assert_eq!(taker.fills.len(), 1);
    assert_eq!(taker.fills[0].maker_order_id, first.order.id);
    assert_eq!(taker.fills[0].quantity, 5);

    let first_row = engine.db().order(first.order.id).await.unwrap().unwrap();
    let second_row = engine.db().order(second.order.id).await.unwrap().unwrap();
    assert_eq!(first_row.status, OrderStatus::Filled);
    assert_eq!(second_row.status, OrderStatus::Open);
    assert_eq!(second_row.remaining_quantity, 5);
}

#[tokio::test]
async fn market_order_walks_the_book() {
    let engine = engine().await;
    list_company(&engine, "WALK", 10_000, 20, Some(dec!(10))).await;
    let carol = create_account(&engine, dec!(1000)).await;
    let dave = create_account(&engine, dec!(1000)).await;
    let alice = create_account(&engine, dec!(5000)).await;

    engine
        .submit(carol, &order("WALK", OrderSide::Buy, OrderType::Market, 10, None))
        .await
        .unwrap();
    engine
        .submit(dave, &order("WALK", OrderSide::Buy, OrderType::Market, 10, None))
        .await
        .unwrap();

    engine
        .submit(carol, &order("WALK", OrderSide::Sell, OrderType::Limit, 10, Some(dec!(100))))
        .await
        .unwrap();
    engine
        .submit(dave, &order("WALK", OrderSide::Sell, OrderType::Limit, 5, Some(dec!(101))))
        .await
        .unwrap();

    let alice_before = engine.db().account(alice).await.unwrap().unwrap().cash_balance;
    let outcome = engine
        .submit(alice, &order("WALK", OrderSide::Buy, OrderType::Market, 12, None))
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Filled);
    assert_eq!(outcome.fills.len(), 2);
    assert_eq!((outcome.fills[0].price, outcome.fills[0].quantity), (dec!(100), 10));
    assert_eq!((outcome.fills[1].price, outcome.fills[1].quantity), (dec!(101), 2));

    let alice_after = engine.db().account(alice).await.unwrap().unwrap().cash_balance;
    assert_eq!(alice_before - alice_after, dec!(1202));

    // 3 shares remain offered at 101.
    let snapshot = engine.snapshot("WALK", 10).unwrap();
    assert_eq!(snapshot.asks.len(), 1);
    assert_eq!(snapshot.asks[0].price, dec!(101));
    assert_eq!(snapshot.asks[0].quantity, 3);
}

#[tokio::test]
async fn insufficient_funds_rejects_without_state_change() {
    let engine = engine().await;
    list_company(&engine, "POOR", 1_000, 10, Some(dec!(100))).await;
    let alice = create_account(&engine, dec!(50)).await;

    let result = engine
        .submit(alice, &order("POOR", OrderSide::Buy, OrderType::Limit, 1, Some(dec!(100))))
        .await;
    assert!(matches!(result, Err(ExchangeError::InsufficientFunds { .. })));

    // No order row, no cash movement, book untouched.
    let orders = engine
        .db()
        .orders_for_account(alice, None, None)
        .await
        .unwrap();
    assert!(orders.is_empty());
    let account = engine.db().account(alice).await.unwrap().unwrap();
    assert_eq!(account.cash_balance, dec!(50));
    let snapshot = engine.snapshot("POOR", 10).unwrap();
    assert_eq!(snapshot.asks[0].quantity, 10);
}

#[tokio::test]
async fn insufficient_shares_rejects_sell() {
    let engine = engine().await;
    list_company(&engine, "BARE", 1_000, 10, Some(dec!(10))).await;
    let alice = create_account(&engine, dec!(1000)).await;

    let result = engine
        .submit(alice, &order("BARE", OrderSide::Sell, OrderType::Limit, 5, Some(dec!(10))))
        .await;
    assert!(matches!(
        result,
        Err(ExchangeError::InsufficientShares { required: 5, available: 0 })
    ));
}

#[tokio::test]
async fn market_buy_on_empty_book_is_cancelled() {
    let engine = engine().await;
    list_company(&engine, "EMPT", 1_000, 0, None).await;
    let alice = create_account(&engine, dec!(1000)).await;

    let outcome = engine
        .submit(alice, &order("EMPT", OrderSide::Buy, OrderType::Market, 10, None))
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Cancelled);
    assert!(outcome.fills.is_empty());

    // The cancelled order row is the only state change.
    let row = engine.db().order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(row.status, OrderStatus::Cancelled);
    assert_eq!(row.remaining_quantity, 10);
    let account = engine.db().account(alice).await.unwrap().unwrap();
    assert_eq!(account.cash_balance, dec!(1000));
}

#[tokio::test]
async fn limit_buy_below_asks_rests_at_its_price() {
    let engine = engine().await;
    list_company(&engine, "REST", 1_000, 10, Some(dec!(100))).await;
    let alice = create_account(&engine, dec!(10_000)).await;

    let outcome = engine
        .submit(alice, &order("REST", OrderSide::Buy, OrderType::Limit, 5, Some(dec!(99.50))))
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Open);
    assert!(outcome.fills.is_empty());
    let snapshot = engine.snapshot("REST", 10).unwrap();
    assert_eq!(snapshot.bids[0].price, dec!(99.50));
    assert_eq!(snapshot.asks[0].price, dec!(100));
}

#[tokio::test]
async fn limit_buy_at_best_ask_matches() {
    let engine = engine().await;
    list_company(&engine, "TOUC", 1_000, 10, Some(dec!(100))).await;
    let alice = create_account(&engine, dec!(10_000)).await;

    let outcome = engine
        .submit(alice, &order("TOUC", OrderSide::Buy, OrderType::Limit, 5, Some(dec!(100))))
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Filled);
    assert_eq!(outcome.fills.len(), 1);
    assert_eq!(outcome.fills[0].price, dec!(100));
}

#[tokio::test]
async fn self_trade_nets_to_zero() {
    let engine = engine().await;
    list_company(&engine, "SELF", 1_000, 10, Some(dec!(10))).await;
    let alice = create_account(&engine, dec!(1000)).await;

    engine
        .submit(alice, &order("SELF", OrderSide::Buy, OrderType::Market, 10, None))
        .await
        .unwrap();
    let cash_before = engine.db().account(alice).await.unwrap().unwrap().cash_balance;

    engine
        .submit(alice, &order("SELF", OrderSide::Sell, OrderType::Limit, 4, Some(dec!(20))))
        .await
        .unwrap();
    let outcome = engine
        .submit(alice, &order("SELF", OrderSide::Buy, OrderType::Limit, 4, Some(dec!(20))))
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Filled);
    let account = engine.db().account(alice).await.unwrap().unwrap();
    assert_eq!(account.cash_balance, cash_before);
    assert_eq!(engine.db().holding(alice, "SELF").await.unwrap(), 10);
}

#[tokio::test]
async fn selling_entire_position_deletes_the_holding_row() {
    let engine = engine().await;
    list_company(&engine, "GONE", 1_000, 10, Some(dec!(10))).await;
    let alice = create_account(&engine, dec!(1000)).await;
    let bob = create_account(&engine, dec!(1000)).await;

    engine
        .submit(alice, &order("GONE", OrderSide::Buy, OrderType::Market, 10, None))
        .await
        .unwrap();
    engine
        .submit(bob, &order("GONE", OrderSide::Buy, OrderType::Limit, 10, Some(dec!(11))))
        .await
        .unwrap();
    engine
        .submit(alice, &order("GONE", OrderSide::Sell, OrderType::Market, 10, None))
        .await
        .unwrap();

    assert_eq!(engine.db().holding(alice, "GONE").await.unwrap(), 0);
    let rows = engine.db().holdings_for_account(alice).await.unwrap();
    assert!(rows.iter().all(|h| h.ticker != "GONE"));
}

#[tokio::test]
async fn double_cancel_conflicts_and_leaves_state_unchanged() {
    let engine = engine().await;
    list_company(&engine, "CANC", 1_000, 0, None).await;
    let alice = create_account(&engine, dec!(10_000)).await;

    let outcome = engine
        .submit(alice, &order("CANC", OrderSide::Buy, OrderType::Limit, 5, Some(dec!(10))))
        .await
        .unwrap();

    let cancelled = engine.cancel(alice, outcome.order.id, false).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let second = engine.cancel(alice, outcome.order.id, false).await;
    assert!(matches!(second, Err(ExchangeError::NotCancellable(_))));
    let row = engine.db().order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(row.status, OrderStatus::Cancelled);
    assert_eq!(row.remaining_quantity, 5);
}

#[tokio::test]
async fn cancel_by_non_owner_is_forbidden() {
    let engine = engine().await;
    list_company(&engine, "OWNR", 1_000, 0, None).await;
    let alice = create_account(&engine, dec!(1000)).await;
    let mallory = create_account(&engine, dec!(1000)).await;

    let outcome = engine
        .submit(alice, &order("OWNR", OrderSide::Buy, OrderType::Limit, 5, Some(dec!(10))))
        .await
        .unwrap();
    let result = engine.cancel(mallory, outcome.order.id, false).await;
    assert!(matches!(result, Err(ExchangeError::NotOwner)));
}

#[tokio::test]
async fn unknown_ticker_and_bad_requests_are_rejected() {
    let engine = engine().await;
    let alice = create_account(&engine, dec!(1000)).await;

    let unknown = engine
        .submit(alice, &order("NOPE", OrderSide::Buy, OrderType::Limit, 1, Some(dec!(1))))
        .await;
    assert!(matches!(unknown, Err(ExchangeError::UnknownTicker(_))));

    list_company(&engine, "VALD", 1_000, 0, None).await;
    let zero_qty = engine
        .submit(alice, &order("VALD", OrderSide::Buy, OrderType::Limit, 0, Some(dec!(1))))
        .await;
    assert!(matches!(zero_qty, Err(ExchangeError::InvalidOrder(_))));

    let no_price = engine
        .submit(alice, &order("VALD", OrderSide::Buy, OrderType::Limit, 1, None))
        .await;
    assert!(matches!(no_price, Err(ExchangeError::InvalidOrder(_))));

    let priced_market = engine
        .submit(alice, &order("VALD", OrderSide::Buy, OrderType::Market, 1, Some(dec!(1))))
        .await;
    assert!(matches!(priced_market, Err(ExchangeError::InvalidOrder(_))));

    let sub_cent = engine
        .submit(alice, &order("VALD", OrderSide::Buy, OrderType::Limit, 1, Some(dec!(1.005))))
        .await;
    assert!(matches!(sub_cent, Err(ExchangeError::InvalidOrder(_))));
}

#[tokio::test]
async fn duplicate_ticker_conflicts() {
    let engine = engine().await;
    list_company(&engine, "DUPE", 1_000, 0, None).await;
    let result = engine
        .list_company(&CreateCompanyRequest {
            ticker: "DUPE".to_string(),
            name: "Dupe Again".to_string(),
            total_shares: 500,
            float_shares: 0,
            ipo_price: None,
        })
        .await;
    assert!(matches!(result, Err(ExchangeError::DuplicateTicker(_))));
}

#[tokio::test]
async fn book_rebuild_reproduces_live_index() {
    let database = Database::connect_in_memory().await.unwrap();
    let engine = Arc::new(MatchingEngine::new(database.clone()));
    engine.bootstrap().await.unwrap();

    list_company(&engine, "REBD", 10_000, 100, Some(dec!(20))).await;
    let alice = create_account(&engine, dec!(100_000)).await;
    engine
        .submit(alice, &order("REBD", OrderSide::Buy, OrderType::Market, 40, None))
        .await
        .unwrap();
    engine
        .submit(alice, &order("REBD", OrderSide::Buy, OrderType::Limit, 7, Some(dec!(19))))
        .await
        .unwrap();
    engine
        .submit(alice, &order("REBD", OrderSide::Sell, OrderType::Limit, 5, Some(dec!(25))))
        .await
        .unwrap();

    // A second engine over the same store must rebuild the identical book.
    let rebuilt = Arc::new(MatchingEngine::new(database));
    let recovered = rebuilt.bootstrap().await.unwrap();
    assert_eq!(recovered, 3); // 60 IPO shares + alice's bid + alice's offer

    let live = engine.snapshot("REBD", 50).unwrap();
    let restored = rebuilt.snapshot("REBD", 50).unwrap();
    assert_eq!(
        serde_json::to_value(&live.bids).unwrap(),
        serde_json::to_value(&restored.bids).unwrap()
    );
    assert_eq!(
        serde_json::to_value(&live.asks).unwrap(),
        serde_json::to_value(&restored.asks).unwrap()
    );
}

#[tokio::test]
async fn market_data_reflects_trades() {
    let engine = engine().await;
    list_company(&engine, "DATA", 1_000, 100, Some(dec!(10))).await;
    let alice = create_account(&engine, dec!(10_000)).await;

    engine
        .submit(alice, &order("DATA", OrderSide::Buy, OrderType::Market, 20, None))
        .await
        .unwrap();

    let data = stockex_backend::services::market::market_data(engine.db(), &engine, "DATA")
        .await
        .unwrap();
    assert_eq!(data.last_price, Some(dec!(10)));
    assert_eq!(data.volume_24h, 20);
    assert_eq!(data.high_24h, Some(dec!(10)));
    assert_eq!(data.market_cap, Some(dec!(10000)));
    assert_eq!(data.best_ask, Some(dec!(10)));
}
