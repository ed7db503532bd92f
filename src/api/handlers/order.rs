//! Order placement, inspection and cancellation.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::ExchangeState;
use crate::auth::middleware::AuthAccount;
use crate::models::{
    CreateOrderRequest, FillDto, OrderDto, OrderStatus, SubmitOrderResponse,
};
use crate::services::matching::SubmitOutcome;
use crate::utils::response::ApiError;

fn outcome_to_response(outcome: SubmitOutcome) -> SubmitOrderResponse {
    let fills = outcome
        .fills
        .iter()
        .map(|fill| FillDto {
            trade_id: fill.trade_id,
            price: fill.price,
            quantity: fill.quantity,
            executed_at: fill.executed_at,
        })
        .collect();
    SubmitOrderResponse {
        order: outcome.order.into(),
        fills,
    }
}

/// POST /orders — submit and match synchronously.
pub async fn create_order(
    State(state): State<Arc<ExchangeState>>,
    Extension(auth): Extension<AuthAccount>,
    Json(mut req): Json<CreateOrderRequest>,
) -> Result<Json<SubmitOrderResponse>, ApiError> {
    req.ticker = req.ticker.to_uppercase();
    let outcome = state
        .engine
        .submit(auth.account_id, &req)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(outcome_to_response(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<String>,
    pub ticker: Option<String>,
}

/// GET /orders — the caller's orders, optionally filtered.
pub async fn get_orders(
    State(state): State<Arc<ExchangeState>>,
    Extension(auth): Extension<AuthAccount>,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<Vec<OrderDto>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(OrderStatus::from_str)
        .transpose()
        .map_err(|err| ApiError::invalid_parameters(&err))?;
    let ticker = query.ticker.map(|t| t.to_uppercase());

    let orders = state
        .db
        .orders_for_account(auth.account_id, status, ticker.as_deref())
        .await
        .map_err(|err| {
            tracing::error!("order query failed: {err}");
            ApiError::internal("internal error")
        })?;
    Ok(Json(orders.into_iter().map(OrderDto::from).collect()))
}

/// GET /orders/{id} — owner only.
pub async fn get_order(
    State(state): State<Arc<ExchangeState>>,
    Extension(auth): Extension<AuthAccount>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderDto>, ApiError> {
    let order = state
        .db
        .order(order_id)
        .await
        .map_err(|err| {
            tracing::error!("order lookup failed: {err}");
            ApiError::internal("internal error")
        })?
        .ok_or_else(|| ApiError::not_found(&format!("order not found: {order_id}")))?;
    if order.account_id != auth.account_id {
        return Err(ApiError::forbidden("order belongs to a different account"));
    }
    Ok(Json(order.into()))
}

/// DELETE /orders/{id} — cancel iff still OPEN/PARTIAL.
pub async fn cancel_order(
    State(state): State<Arc<ExchangeState>>,
    Extension(auth): Extension<AuthAccount>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderDto>, ApiError> {
    let order = state
        .engine
        .cancel(auth.account_id, order_id, false)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(order.into()))
}
