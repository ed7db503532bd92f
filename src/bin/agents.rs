//! Agent platform service: runs trading bots against the exchange API.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockex_backend::agents::api::{self, AgentsState};
use stockex_backend::agents::runtime::AgentRuntime;
use stockex_backend::agents::strategy::StrategyCatalog;
use stockex_backend::config::AgentPlatformConfig;

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
    let config = AgentPlatformConfig::load()?;

    tracing::info!("starting agent platform v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("exchange endpoint: {}", config.exchange_url);

    let catalog = StrategyCatalog::builtin()
        .map_err(|errors| anyhow::anyhow!("built-in strategies failed to compile: {errors:?}"))?;
    tracing::info!("strategy catalog loaded with {} entries", catalog.list().len());

    let port = config.port;
    let runtime = Arc::new(AgentRuntime::new(config));
    let state = Arc::new(AgentsState {
        runtime,
        catalog: Arc::new(catalog),
    });

    let app = api::create_router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("agent platform listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
