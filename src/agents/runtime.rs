//! Per-agent scheduler and state machine.
//!
//! Each agent is one tokio task ticking on a fixed interval. Ticks never
//! overlap (missed ticks are skipped), control transitions are flags checked
//! at tick boundaries so an in-flight tick always completes, and a hard
//! timeout abandons a runaway tick. Ten consecutive failed ticks trip the
//! ERROR state, which only an explicit start clears.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::client::{ClientError, ExchangeClient};
use super::rules::{
    conditions_hold, plan_random, plan_rule, CooldownBook, Intent, MarketView, OwnView,
};
use super::strategy::{StrategyDoc, StrategyKind, TickerSelector};
use crate::config::AgentPlatformConfig;
use crate::models::{CreateOrderRequest, OrderDto};

const MAX_CONSECUTIVE_FAILURES: u32 = 10;
const RECENT_TRADE_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentState {
    Created,
    Running,
    Paused,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DesiredState {
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("agent not found")]
    NotFound,

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid agent: {0}")]
    InvalidSpec(String),
}

/// Mutable agent state shared between the API surface and the tick task.
pub struct AgentShared {
    pub id: Uuid,
    pub name: RwLock<String>,
    pub api_key: String,
    pub interval_secs: AtomicU64,
    pub strategy: RwLock<StrategyKind>,
    pub strategy_doc: RwLock<Option<StrategyDoc>>,
    pub state: RwLock<AgentState>,
    pub last_error: RwLock<Option<String>>,
    pub consecutive_failures: AtomicU32,
    pub ticks_completed: AtomicU64,
    pub orders_placed: AtomicU64,
    pub last_tick_at: RwLock<Option<DateTime<Utc>>>,
    pub cooldowns: Mutex<CooldownBook>,
    pub created_at: DateTime<Utc>,
}

pub struct AgentHandle {
    pub shared: Arc<AgentShared>,
    control: Mutex<watch::Sender<DesiredState>>,
    task: Mutex<Option<JoinHandle<()>>>,
    client: ExchangeClient,
}

impl AgentHandle {
    fn task_alive(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

pub struct AgentRuntime {
    config: AgentPlatformConfig,
    agents: DashMap<Uuid, Arc<AgentHandle>>,
}

impl AgentRuntime {
    pub fn new(config: AgentPlatformConfig) -> Self {
        Self {
            config,
            agents: DashMap::new(),
        }
    }

    pub fn create(
        &self,
        name: &str,
        api_key: &str,
        interval_secs: u64,
        strategy: StrategyKind,
        strategy_doc: Option<StrategyDoc>,
    ) -> Result<Arc<AgentHandle>, RuntimeError> {
        if name.trim().is_empty() {
            return Err(RuntimeError::InvalidSpec("name is empty".into()));
        }
        if api_key.trim().is_empty() {
            return Err(RuntimeError::InvalidSpec("api_key is empty".into()));
        }
        if interval_secs == 0 {
            return Err(RuntimeError::InvalidSpec(
                "interval_seconds must be at least 1".into(),
            ));
        }
        let client = ExchangeClient::new(&self.config.exchange_url, api_key)
            .map_err(|err| RuntimeError::InvalidSpec(format!("client setup failed: {err}")))?;

        let shared = Arc::new(AgentShared {
            id: Uuid::new_v4(),
            name: RwLock::new(name.to_string()),
            api_key: api_key.to_string(),
            interval_secs: AtomicU64::new(interval_secs),
            strategy: RwLock::new(strategy),
            strategy_doc: RwLock::new(strategy_doc),
            state: RwLock::new(AgentState::Created),
            last_error: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
            ticks_completed: AtomicU64::new(0),
            orders_placed: AtomicU64::new(0),
            last_tick_at: RwLock::new(None),
            cooldowns: Mutex::new(CooldownBook::new()),
            created_at: Utc::now(),
        });
        // Placeholder channel; replaced when the task is spawned.
        let (control, _) = watch::channel(DesiredState::Stopped);
        let handle = Arc::new(AgentHandle {
            shared,
            control: Mutex::new(control),
            task: Mutex::new(None),
            client,
        });
        self.agents.insert(handle.shared.id, handle.clone());
        tracing::info!(agent_id = %handle.shared.id, name, "agent created");
        Ok(handle)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<AgentHandle>> {
        self.agents.get(&id).map(|h| h.clone())
    }

    pub fn list(&self) -> Vec<Arc<AgentHandle>> {
        let mut handles: Vec<_> = self.agents.iter().map(|h| h.clone()).collect();
        handles.sort_by_key(|h| h.shared.created_at);
        handles
    }

    /// Start (or resume, or restart after STOPPED/ERROR) an agent.
    pub fn start(&self, id: Uuid) -> Result<Arc<AgentHandle>, RuntimeError> {
        let handle = self.get(id).ok_or(RuntimeError::NotFound)?;

        if handle.task_alive() {
            let _ = handle.control.lock().send(DesiredState::Running);
            return Ok(handle);
        }

        // Fresh task: clear the error budget; the operator explicitly
        // restarted after STOPPED/ERROR.
        handle.shared.consecutive_failures.store(0, Ordering::Relaxed);
        *handle.shared.last_error.write() = None;
        *handle.shared.state.write() = AgentState::Running;

        let (control, control_rx) = watch::channel(DesiredState::Running);
        *handle.control.lock() = control;

        let shared = handle.shared.clone();
        let client = handle.client.clone();
        let config = self.config.clone();
        let task = tokio::spawn(async move {
            run_agent(shared, control_rx, client, config).await;
        });
        *handle.task.lock() = Some(task);

        tracing::info!(agent_id = %id, "agent started");
        Ok(handle)
    }

    pub fn pause(&self, id: Uuid) -> Result<Arc<AgentHandle>, RuntimeError> {
        let handle = self.get(id).ok_or(RuntimeError::NotFound)?;
        let state = *handle.shared.state.read();
        if state != AgentState::Running || !handle.task_alive() {
            return Err(RuntimeError::InvalidTransition(format!(
                "cannot pause agent in state {state:?}"
            )));
        }
        let _ = handle.control.lock().send(DesiredState::Paused);
        Ok(handle)
    }

    pub fn stop(&self, id: Uuid) -> Result<Arc<AgentHandle>, RuntimeError> {
        let handle = self.get(id).ok_or(RuntimeError::NotFound)?;
        let state = *handle.shared.state.read();
        if !matches!(state, AgentState::Running | AgentState::Paused) {
            return Err(RuntimeError::InvalidTransition(format!(
                "cannot stop agent in state {state:?}"
            )));
        }
        let _ = handle.control.lock().send(DesiredState::Stopped);
        Ok(handle)
    }

    /// Remove an agent. A live task is flagged to stop and exits at its next
    /// tick boundary.
    pub fn remove(&self, id: Uuid) -> Result<(), RuntimeError> {
        let (_, handle) = self.agents.remove(&id).ok_or(RuntimeError::NotFound)?;
        let _ = handle.control.lock().send(DesiredState::Stopped);
        tracing::info!(agent_id = %id, "agent removed");
        Ok(())
    }

    /// Edit name / interval / strategy. Rejected while RUNNING; a strategy
    /// replacement resets every cooldown.
    pub fn update(
        &self,
        id: Uuid,
        name: Option<String>,
        interval_secs: Option<u64>,
        strategy: Option<(StrategyKind, Option<StrategyDoc>)>,
    ) -> Result<Arc<AgentHandle>, RuntimeError> {
        let handle = self.get(id).ok_or(RuntimeError::NotFound)?;
        let state = *handle.shared.state.read();
        if state == AgentState::Running {
            return Err(RuntimeError::InvalidTransition(
                "stop or pause the agent before editing it".into(),
            ));
        }

        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(RuntimeError::InvalidSpec("name is empty".into()));
            }
            *handle.shared.name.write() = name;
        }
        if let Some(interval) = interval_secs {
            if interval == 0 {
                return Err(RuntimeError::InvalidSpec(
                    "interval_seconds must be at least 1".into(),
                ));
            }
            handle.shared.interval_secs.store(interval, Ordering::Relaxed);
        }
        if let Some((kind, doc)) = strategy {
            *handle.shared.strategy.write() = kind;
            *handle.shared.strategy_doc.write() = doc;
            handle.shared.cooldowns.lock().reset();
        }
        Ok(handle)
    }
}

// ============================================================================
// Tick loop
// ============================================================================

async fn run_agent(
    shared: Arc<AgentShared>,
    mut control: watch::Receiver<DesiredState>,
    client: ExchangeClient,
    config: AgentPlatformConfig,
) {
    let mut current_secs = shared.interval_secs.load(Ordering::Relaxed).max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs(current_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let desired = *control.borrow();
        match desired {
            DesiredState::Stopped => {
                *shared.state.write() = AgentState::Stopped;
                break;
            }
            DesiredState::Paused => {
                *shared.state.write() = AgentState::Paused;
                if control.changed().await.is_err() {
                    *shared.state.write() = AgentState::Stopped;
                    break;
                }
                continue;
            }
            DesiredState::Running => {
                *shared.state.write() = AgentState::Running;
            }
        }

        let secs = shared.interval_secs.load(Ordering::Relaxed).max(1);
        if secs != current_secs {
            current_secs = secs;
            ticker = tokio::time::interval(Duration::from_secs(current_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        tokio::select! {
            changed = control.changed() => {
                if changed.is_err() {
                    *shared.state.write() = AgentState::Stopped;
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let started = Instant::now();
        *shared.last_tick_at.write() = Some(Utc::now());
        let outcome = tokio::time::timeout(
            Duration::from_secs(config.tick_timeout_secs),
            run_tick(&shared, &client, &config),
        )
        .await;
        shared.ticks_completed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(Ok(placed)) => {
                shared.consecutive_failures.store(0, Ordering::Relaxed);
                shared.orders_placed.fetch_add(placed, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                let failures = shared.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                *shared.last_error.write() = Some(err.to_string());
                tracing::warn!(
                    agent_id = %shared.id,
                    failures,
                    "tick failed: {err}"
                );
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!(
                        agent_id = %shared.id,
                        "error budget exhausted, agent entering ERROR state"
                    );
                    *shared.state.write() = AgentState::Error;
                    break;
                }
            }
            Err(_) => {
                tracing::error!(
                    agent_id = %shared.id,
                    timeout_secs = config.tick_timeout_secs,
                    "tick abandoned after hard timeout, stopping agent"
                );
                *shared.last_error.write() =
                    Some(format!("tick exceeded {}s hard timeout", config.tick_timeout_secs));
                *shared.state.write() = AgentState::Stopped;
                break;
            }
        }

        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(current_secs) {
            tracing::warn!(
                agent_id = %shared.id,
                elapsed_ms = elapsed.as_millis() as u64,
                interval_secs = current_secs,
                "tick ran longer than the interval"
            );
        }
    }
    tracing::info!(agent_id = %shared.id, "agent task exited");
}

async fn run_tick(
    shared: &AgentShared,
    client: &ExchangeClient,
    config: &AgentPlatformConfig,
) -> Result<u64, ClientError> {
    let strategy = shared.strategy.read().clone();

    let tickers = match strategy.referenced_tickers() {
        Some(tickers) => tickers,
        None => client
            .companies()
            .await?
            .into_iter()
            .map(|company| company.ticker)
            .take(config.max_tickers_per_tick)
            .collect(),
    };
    if tickers.is_empty() {
        return Ok(0);
    }

    let account = client.account().await?;
    let holdings = client.holdings().await?;
    let my_orders = client.orders().await?;

    let views =
        futures::future::join_all(tickers.iter().map(|t| build_market_view(client, t))).await;
    let mut markets = Vec::with_capacity(views.len());
    for view in views {
        markets.push(view?);
    }

    let own_for = |ticker: &str| -> OwnView {
        OwnView {
            cash: account.cash_balance,
            holdings: holdings
                .iter()
                .find(|h| h.ticker == ticker)
                .map(|h| h.quantity)
                .unwrap_or(0),
            open_orders: my_orders
                .iter()
                .filter(|o| o.ticker == ticker && !o.status.is_terminal())
                .count() as i64,
        }
    };

    let mut placed = 0_u64;
    match strategy {
        StrategyKind::RuleBased(compiled) => {
            let now_ms = Utc::now().timestamp_millis();
            for (rule_index, rule) in compiled.rules.iter().enumerate() {
                if !shared
                    .cooldowns
                    .lock()
                    .due(rule_index, rule.cooldown_ms, now_ms)
                {
                    continue;
                }
                let candidates: Vec<&MarketView> = match &rule.ticker {
                    TickerSelector::One(ticker) => {
                        markets.iter().filter(|m| &m.ticker == ticker).collect()
                    }
                    TickerSelector::All => markets.iter().collect(),
                };

                let mut fired = false;
                for market in candidates {
                    let own = own_for(&market.ticker);
                    if !conditions_hold(&rule.when, market, &own) {
                        continue;
                    }
                    for intent in plan_rule(rule, &compiled.settings, market, &own) {
                        let executed =
                            execute_intent(client, &intent, &my_orders, &mut placed).await?;
                        fired = fired || executed;
                    }
                }
                if fired {
                    shared.cooldowns.lock().record(rule_index, now_ms);
                }
            }
        }
        StrategyKind::Random(random) => {
            let mut rng = StdRng::from_entropy();
            for intent in plan_random(&random, &mut rng, &markets, own_for) {
                execute_intent(client, &intent, &my_orders, &mut placed).await?;
            }
        }
    }

    Ok(placed)
}

async fn execute_intent(
    client: &ExchangeClient,
    intent: &Intent,
    my_orders: &[OrderDto],
    placed: &mut u64,
) -> Result<bool, ClientError> {
    match intent {
        Intent::Place(order) => {
            let request = CreateOrderRequest {
                ticker: order.ticker.clone(),
                side: order.side,
                order_type: order.order_type,
                quantity: order.quantity,
                price: order.price,
            };
            let response = client.place_order(&request).await?;
            tracing::debug!(
                ticker = %request.ticker,
                side = %request.side,
                quantity = request.quantity,
                status = %response.order.status,
                "agent order placed"
            );
            *placed += 1;
            Ok(true)
        }
        Intent::CancelOpenOrders { ticker } => {
            let mut any = false;
            for order in my_orders
                .iter()
                .filter(|o| &o.ticker == ticker && !o.status.is_terminal())
            {
                // The order may have filled since the snapshot; a conflict is
                // not a tick failure.
                match client.cancel_order(order.id).await {
                    Ok(_) => any = true,
                    Err(err) if err.code() == Some("CONFLICT") => {}
                    Err(err) => return Err(err),
                }
            }
            Ok(any)
        }
    }
}

async fn build_market_view(
    client: &ExchangeClient,
    ticker: &str,
) -> Result<MarketView, ClientError> {
    let data = client.market_data(ticker).await?;
    let trades = client.recent_trades(ticker, RECENT_TRADE_WINDOW).await?;
    let avg_recent_price = if trades.is_empty() {
        None
    } else {
        let sum: rust_decimal::Decimal = trades.iter().map(|t| t.price).sum();
        Some(sum / rust_decimal::Decimal::from(trades.len() as i64))
    };
    Ok(MarketView {
        ticker: ticker.to_string(),
        last_price: data.last_price,
        avg_recent_price,
        best_bid: data.best_bid,
        best_ask: data.best_ask,
    })
}
