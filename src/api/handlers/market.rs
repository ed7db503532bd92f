//! Public market data handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::ExchangeState;
use crate::models::{Company, TradeDto};
use crate::services::market::{self, MarketData};
use crate::services::matching::BookSnapshot;
use crate::utils::response::ApiError;

const DEFAULT_DEPTH: usize = 10;
const MAX_DEPTH: usize = 50;
const DEFAULT_TRADE_LIMIT: i64 = 50;
const MAX_TRADE_LIMIT: i64 = 200;

pub async fn list_companies(
    State(state): State<Arc<ExchangeState>>,
) -> Result<Json<Vec<Company>>, ApiError> {
    let companies = state.db.companies().await.map_err(|err| {
        tracing::error!("listing companies failed: {err}");
        ApiError::internal("internal error")
    })?;
    Ok(Json(companies))
}

pub async fn get_company(
    State(state): State<Arc<ExchangeState>>,
    Path(ticker): Path<String>,
) -> Result<Json<Company>, ApiError> {
    let ticker = ticker.to_uppercase();
    let company = state
        .db
        .company(&ticker)
        .await
        .map_err(|err| {
            tracing::error!("company lookup failed: {err}");
            ApiError::internal("internal error")
        })?
        .ok_or_else(|| ApiError::not_found(&format!("unknown ticker: {ticker}")))?;
    Ok(Json(company))
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub depth: Option<usize>,
}

pub async fn get_orderbook(
    State(state): State<Arc<ExchangeState>>,
    Path(ticker): Path<String>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<BookSnapshot>, ApiError> {
    let ticker = ticker.to_uppercase();
    let depth = query.depth.unwrap_or(DEFAULT_DEPTH).clamp(1, MAX_DEPTH);
    let snapshot = state
        .engine
        .snapshot(&ticker, depth)
        .ok_or_else(|| ApiError::not_found(&format!("unknown ticker: {ticker}")))?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<i64>,
    pub since: Option<DateTime<Utc>>,
}

pub async fn get_trades(
    State(state): State<Arc<ExchangeState>>,
    Path(ticker): Path<String>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Vec<TradeDto>>, ApiError> {
    let ticker = ticker.to_uppercase();
    if state
        .db
        .company(&ticker)
        .await
        .map_err(|err| {
            tracing::error!("company lookup failed: {err}");
            ApiError::internal("internal error")
        })?
        .is_none()
    {
        return Err(ApiError::not_found(&format!("unknown ticker: {ticker}")));
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_TRADE_LIMIT)
        .clamp(1, MAX_TRADE_LIMIT);
    let trades = state
        .db
        .trades_for_ticker(&ticker, limit, query.since)
        .await
        .map_err(|err| {
            tracing::error!("trade query failed: {err}");
            ApiError::internal("internal error")
        })?;
    Ok(Json(trades.into_iter().map(TradeDto::from).collect()))
}

pub async fn all_market_data(
    State(state): State<Arc<ExchangeState>>,
) -> Result<Json<Vec<MarketData>>, ApiError> {
    let data = market::all_market_data(&state.db, &state.engine)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(data))
}

pub async fn get_market_data(
    State(state): State<Arc<ExchangeState>>,
    Path(ticker): Path<String>,
) -> Result<Json<MarketData>, ApiError> {
    let ticker = ticker.to_uppercase();
    let data = market::market_data(&state.db, &state.engine, &ticker)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(data))
}
