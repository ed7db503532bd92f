//! Admin surface: entity provisioning and operator views.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::ExchangeState;
use crate::auth::api_key::{generate_api_key, hash_api_key};
use crate::db;
use crate::models::{
    Account, AccountDto, Company, CreateAccountRequest, CreateAccountResponse,
    CreateCompanyRequest, HoldingDto,
};
use crate::services::matching::BookOrderView;
use crate::utils::money::to_cents;
use crate::utils::response::ApiError;

/// POST /admin/companies — list a company, seeding the IPO float when priced.
pub async fn create_company(
    State(state): State<Arc<ExchangeState>>,
    Json(mut req): Json<CreateCompanyRequest>,
) -> Result<Json<Company>, ApiError> {
    req.ticker = req.ticker.to_uppercase();
    let company = state
        .engine
        .list_company(&req)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(company))
}

/// POST /admin/accounts — the response carries the API key exactly once.
pub async fn create_account(
    State(state): State<Arc<ExchangeState>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<CreateAccountResponse>, ApiError> {
    if req.initial_cash < Decimal::ZERO {
        return Err(ApiError::invalid_parameters(
            "initial_cash must not be negative",
        ));
    }
    let cash_cents = to_cents(req.initial_cash).ok_or_else(|| {
        ApiError::invalid_parameters("initial_cash must have at most 2 decimals")
    })?;

    let account = Account {
        id: Uuid::new_v4(),
        cash_balance: crate::utils::money::from_cents(cash_cents),
        created_at: Utc::now(),
    };
    let api_key = generate_api_key();
    let key_hash = hash_api_key(&api_key);

    let mut tx = state.db.pool.begin().await.map_err(internal)?;
    db::insert_account(&mut tx, &account, cash_cents, &key_hash, false)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;

    state.api_keys.insert(key_hash, account.id);
    tracing::info!(account_id = %account.id, "account created");

    Ok(Json(CreateAccountResponse {
        id: account.id,
        api_key,
        cash_balance: account.cash_balance,
        created_at: account.created_at,
    }))
}

pub async fn list_accounts(
    State(state): State<Arc<ExchangeState>>,
) -> Result<Json<Vec<AccountDto>>, ApiError> {
    let accounts = state.db.accounts().await.map_err(internal)?;
    Ok(Json(accounts.into_iter().map(AccountDto::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct AccountDetail {
    #[serde(flatten)]
    pub account: AccountDto,
    pub holdings: Vec<HoldingDto>,
}

pub async fn get_account(
    State(state): State<Arc<ExchangeState>>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<AccountDetail>, ApiError> {
    let account = state
        .db
        .account(account_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(&format!("account not found: {account_id}")))?;
    let holdings = state
        .db
        .holdings_for_account(account_id)
        .await
        .map_err(internal)?;
    Ok(Json(AccountDetail {
        account: account.into(),
        holdings: holdings.into_iter().map(HoldingDto::from).collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct StatsDto {
    pub companies: i64,
    pub accounts: i64,
    pub orders: i64,
    pub open_orders: i64,
    pub trades: i64,
    pub total_cash: Decimal,
}

pub async fn get_stats(
    State(state): State<Arc<ExchangeState>>,
) -> Result<Json<StatsDto>, ApiError> {
    let stats = state.db.exchange_stats().await.map_err(internal)?;
    Ok(Json(StatsDto {
        companies: stats.companies,
        accounts: stats.accounts,
        orders: stats.orders,
        open_orders: stats.open_orders,
        trades: stats.trades,
        total_cash: stats.total_cash,
    }))
}

#[derive(Debug, Serialize)]
pub struct AdminBookDto {
    pub ticker: String,
    pub bids: Vec<BookOrderView>,
    pub asks: Vec<BookOrderView>,
}

/// GET /admin/orderbook/{ticker} — every resting order, not aggregated.
pub async fn get_orderbook(
    State(state): State<Arc<ExchangeState>>,
    Path(ticker): Path<String>,
) -> Result<Json<AdminBookDto>, ApiError> {
    let ticker = ticker.to_uppercase();
    let (bids, asks) = state
        .engine
        .orders_view(&ticker)
        .ok_or_else(|| ApiError::not_found(&format!("unknown ticker: {ticker}")))?;
    Ok(Json(AdminBookDto { ticker, bids, asks }))
}

fn internal(err: sqlx::Error) -> ApiError {
    tracing::error!("store error in admin handler: {err}");
    ApiError::internal("internal error")
}
