use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::ExchangeState;
use crate::auth::api_key::hash_api_key;
use crate::utils::response::ApiError;

/// The authenticated account, inserted into request extensions.
#[derive(Clone)]
pub struct AuthAccount {
    pub account_id: Uuid,
}

/// Trader auth: `X-API-Key` -> account id, via the warm cache with a store
/// fallback on first sight of a key.
pub async fn trader_auth(
    State(state): State<Arc<ExchangeState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request
        .headers()
        .get("X-API-Key")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApiError::unauthorized("missing X-API-Key header"))?;

    let key_hash = hash_api_key(&key);
    let account_id = match state.api_keys.get(&key_hash) {
        Some(id) => id,
        None => {
            let id = state
                .db
                .account_id_by_key_hash(&key_hash)
                .await
                .map_err(|err| {
                    tracing::error!("api key lookup failed: {err}");
                    ApiError::internal("internal error")
                })?
                .ok_or_else(|| ApiError::unauthorized("invalid API key"))?;
            state.api_keys.insert(key_hash, id);
            id
        }
    };

    request.extensions_mut().insert(AuthAccount { account_id });
    Ok(next.run(request).await)
}

/// Admin auth: a separately provisioned token, compared by hash.
pub async fn admin_auth(
    State(state): State<Arc<ExchangeState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get("X-Admin-Token")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing X-Admin-Token header"))?;

    if hash_api_key(token) != state.admin_token_hash {
        return Err(ApiError::unauthorized("invalid admin token"));
    }
    Ok(next.run(request).await)
}
