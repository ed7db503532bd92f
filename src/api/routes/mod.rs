use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::api::ExchangeState;
use crate::auth::middleware::{admin_auth, trader_auth};
use crate::auth::rate_limit::{rate_limit_middleware, RateLimiterState};

pub fn create_router(
    state: Arc<ExchangeState>,
    rate_limiter: RateLimiterState,
) -> Router<Arc<ExchangeState>> {
    // Public market data (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/companies", get(handlers::market::list_companies))
        .route("/companies/:ticker", get(handlers::market::get_company))
        .route("/orderbook/:ticker", get(handlers::market::get_orderbook))
        .route("/trades/:ticker", get(handlers::market::get_trades))
        .route("/market-data", get(handlers::market::all_market_data))
        .route("/market-data/:ticker", get(handlers::market::get_market_data));

    // Trader routes (X-API-Key required, rate limited)
    let trader_routes = Router::new()
        .route("/account", get(handlers::account::get_account))
        .route("/holdings", get(handlers::account::get_holdings))
        .route(
            "/orders",
            get(handlers::order::get_orders).post(handlers::order::create_order),
        )
        .route(
            "/orders/:order_id",
            get(handlers::order::get_order).delete(handlers::order::cancel_order),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            trader_auth,
        ))
        .layer(axum_middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    // Admin routes (X-Admin-Token required)
    let admin_routes = Router::new()
        .route("/admin/companies", post(handlers::admin::create_company))
        .route(
            "/admin/accounts",
            get(handlers::admin::list_accounts).post(handlers::admin::create_account),
        )
        .route("/admin/accounts/:account_id", get(handlers::admin::get_account))
        .route("/admin/stats", get(handlers::admin::get_stats))
        .route("/admin/orderbook/:ticker", get(handlers::admin::get_orderbook))
        .layer(axum_middleware::from_fn_with_state(state, admin_auth));

    Router::new()
        .merge(public_routes)
        .merge(trader_routes)
        .merge(admin_routes)
}

async fn health() -> &'static str {
    "OK"
}
