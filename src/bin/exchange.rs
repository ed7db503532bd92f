//! Exchange service: order matching, settlement and the public trading API.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockex_backend::api::{routes, ExchangeState};
use stockex_backend::auth::rate_limit::{RateLimitConfig, RateLimiterState};
use stockex_backend::config::ExchangeConfig;
use stockex_backend::db::Database;
use stockex_backend::services::matching::MatchingEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockex_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = ExchangeConfig::load()?;

    tracing::info!("starting exchange v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::connect(&config.database_url).await?;
    tracing::info!("store ready at {}", config.database_url);

    let engine = Arc::new(MatchingEngine::new(db.clone()));
    let recovered = engine.bootstrap().await?;
    if recovered > 0 {
        tracing::info!("rebuilt order book index with {recovered} resting orders");
    } else {
        tracing::info!("order book index is empty");
    }

    let rate_limiter = RateLimiterState::new(RateLimitConfig {
        max_requests: config.rate_limit_max_requests,
        window_secs: config.rate_limit_window_secs,
    });

    let port = config.port;
    let state = Arc::new(ExchangeState::new(config, db, engine));

    let app = routes::create_router(state.clone(), rate_limiter)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("exchange listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
