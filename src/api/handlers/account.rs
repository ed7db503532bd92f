//! Authenticated account views.

use axum::{extract::State, Extension, Json};
use std::sync::Arc;

use crate::api::ExchangeState;
use crate::auth::middleware::AuthAccount;
use crate::models::{AccountDto, HoldingDto};
use crate::utils::response::ApiError;

pub async fn get_account(
    State(state): State<Arc<ExchangeState>>,
    Extension(auth): Extension<AuthAccount>,
) -> Result<Json<AccountDto>, ApiError> {
    let account = state
        .db
        .account(auth.account_id)
        .await
        .map_err(|err| {
            tracing::error!("account lookup failed: {err}");
            ApiError::internal("internal error")
        })?
        .ok_or_else(|| ApiError::not_found("account not found"))?;
    Ok(Json(account.into()))
}

pub async fn get_holdings(
    State(state): State<Arc<ExchangeState>>,
    Extension(auth): Extension<AuthAccount>,
) -> Result<Json<Vec<HoldingDto>>, ApiError> {
    let holdings = state
        .db
        .holdings_for_account(auth.account_id)
        .await
        .map_err(|err| {
            tracing::error!("holdings lookup failed: {err}");
            ApiError::internal("internal error")
        })?;
    Ok(Json(holdings.into_iter().map(HoldingDto::from).collect()))
}
