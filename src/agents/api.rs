//! Agent platform HTTP surface: strategy catalog, validation and agent
//! lifecycle. Shares the exchange's error envelope.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use super::runtime::{AgentHandle, AgentRuntime, AgentState, RuntimeError};
use super::strategy::{compile, StrategyCatalog, StrategyDoc, StrategyKind};
use crate::utils::response::ApiError;

pub struct AgentsState {
    pub runtime: Arc<AgentRuntime>,
    pub catalog: Arc<StrategyCatalog>,
}

// ============================================================================
// DTOs
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StrategySummary {
    pub id: String,
    pub name: String,
    pub kind: &'static str,
    pub description: String,
    pub rules: usize,
}

#[derive(Debug, Serialize)]
pub struct StrategyDetail {
    pub id: String,
    pub name: String,
    pub kind: &'static str,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<StrategyDoc>,
}

#[derive(Debug, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Strategy reference: a catalog id or an inline document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyRef {
    Builtin(String),
    Document(StrategyDoc),
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub api_key: String,
    pub interval_seconds: u64,
    pub strategy: StrategyRef,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub interval_seconds: Option<u64>,
    pub strategy: Option<StrategyRef>,
}

#[derive(Debug, Serialize)]
pub struct AgentDto {
    pub id: Uuid,
    pub name: String,
    pub state: AgentState,
    pub interval_seconds: u64,
    pub strategy: String,
    pub strategy_kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub ticks_completed: u64,
    pub orders_placed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn agent_dto(handle: &AgentHandle) -> AgentDto {
    let shared = &handle.shared;
    let strategy = shared.strategy.read();
    AgentDto {
        id: shared.id,
        name: shared.name.read().clone(),
        state: *shared.state.read(),
        interval_seconds: shared.interval_secs.load(Ordering::Relaxed),
        strategy: strategy.name().to_string(),
        strategy_kind: strategy.kind_label(),
        last_error: shared.last_error.read().clone(),
        consecutive_failures: shared.consecutive_failures.load(Ordering::Relaxed),
        ticks_completed: shared.ticks_completed.load(Ordering::Relaxed),
        orders_placed: shared.orders_placed.load(Ordering::Relaxed),
        last_tick_at: *shared.last_tick_at.read(),
        created_at: shared.created_at,
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        match &err {
            RuntimeError::NotFound => ApiError::not_found("agent not found"),
            RuntimeError::InvalidTransition(_) => ApiError::conflict(&err.to_string()),
            RuntimeError::InvalidSpec(_) => ApiError::invalid_parameters(&err.to_string()),
        }
    }
}

fn resolve_strategy(
    state: &AgentsState,
    reference: &StrategyRef,
) -> Result<(StrategyKind, Option<StrategyDoc>), ApiError> {
    match reference {
        StrategyRef::Builtin(id) => {
            let entry = state
                .catalog
                .get(id)
                .ok_or_else(|| ApiError::not_found(&format!("unknown strategy: {id}")))?;
            Ok((entry.strategy.clone(), entry.doc.clone()))
        }
        StrategyRef::Document(doc) => {
            let compiled = compile(doc).map_err(|errors| {
                ApiError::invalid_parameters("strategy document failed validation")
                    .with_details(serde_json::json!({ "errors": errors }))
            })?;
            Ok((StrategyKind::RuleBased(compiled), Some(doc.clone())))
        }
    }
}

// ============================================================================
// Strategy handlers
// ============================================================================

async fn list_strategies(State(state): State<Arc<AgentsState>>) -> Json<Vec<StrategySummary>> {
    let entries = state
        .catalog
        .list()
        .iter()
        .map(|entry| StrategySummary {
            id: entry.id.to_string(),
            name: entry.strategy.name().to_string(),
            kind: entry.strategy.kind_label(),
            description: entry.description.to_string(),
            rules: entry
                .doc
                .as_ref()
                .map(|doc| doc.rules.len())
                .unwrap_or_default(),
        })
        .collect();
    Json(entries)
}

async fn get_strategy(
    State(state): State<Arc<AgentsState>>,
    Path(id): Path<String>,
) -> Result<Json<StrategyDetail>, ApiError> {
    let entry = state
        .catalog
        .get(&id)
        .ok_or_else(|| ApiError::not_found(&format!("unknown strategy: {id}")))?;
    Ok(Json(StrategyDetail {
        id: entry.id.to_string(),
        name: entry.strategy.name().to_string(),
        kind: entry.strategy.kind_label(),
        description: entry.description.to_string(),
        document: entry.doc.clone(),
    }))
}

/// Always 200; the body says whether the document compiles.
async fn validate_strategy(Json(body): Json<serde_json::Value>) -> Json<ValidationResult> {
    let doc: StrategyDoc = match serde_json::from_value(body) {
        Ok(doc) => doc,
        Err(err) => {
            return Json(ValidationResult {
                valid: false,
                errors: vec![format!("malformed document: {err}")],
            })
        }
    };
    match compile(&doc) {
        Ok(_) => Json(ValidationResult {
            valid: true,
            errors: Vec::new(),
        }),
        Err(errors) => Json(ValidationResult {
            valid: false,
            errors,
        }),
    }
}

// ============================================================================
// Agent handlers
// ============================================================================

async fn create_agent(
    State(state): State<Arc<AgentsState>>,
    Json(req): Json<CreateAgentRequest>,
) -> Result<Json<AgentDto>, ApiError> {
    let (strategy, doc) = resolve_strategy(&state, &req.strategy)?;
    let handle = state
        .runtime
        .create(&req.name, &req.api_key, req.interval_seconds, strategy, doc)
        .map_err(ApiError::from)?;
    Ok(Json(agent_dto(&handle)))
}

async fn list_agents(State(state): State<Arc<AgentsState>>) -> Json<Vec<AgentDto>> {
    Json(
        state
            .runtime
            .list()
            .iter()
            .map(|handle| agent_dto(handle))
            .collect(),
    )
}

async fn get_agent(
    State(state): State<Arc<AgentsState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AgentDto>, ApiError> {
    let handle = state
        .runtime
        .get(id)
        .ok_or_else(|| ApiError::not_found("agent not found"))?;
    Ok(Json(agent_dto(&handle)))
}

async fn update_agent(
    State(state): State<Arc<AgentsState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAgentRequest>,
) -> Result<Json<AgentDto>, ApiError> {
    let strategy = match &req.strategy {
        Some(reference) => Some(resolve_strategy(&state, reference)?),
        None => None,
    };
    let handle = state
        .runtime
        .update(id, req.name, req.interval_seconds, strategy)
        .map_err(ApiError::from)?;
    Ok(Json(agent_dto(&handle)))
}

async fn delete_agent(
    State(state): State<Arc<AgentsState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.runtime.remove(id).map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

async fn start_agent(
    State(state): State<Arc<AgentsState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AgentDto>, ApiError> {
    let handle = state.runtime.start(id).map_err(ApiError::from)?;
    Ok(Json(agent_dto(&handle)))
}

async fn stop_agent(
    State(state): State<Arc<AgentsState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AgentDto>, ApiError> {
    let handle = state.runtime.stop(id).map_err(ApiError::from)?;
    Ok(Json(agent_dto(&handle)))
}

async fn pause_agent(
    State(state): State<Arc<AgentsState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AgentDto>, ApiError> {
    let handle = state.runtime.pause(id).map_err(ApiError::from)?;
    Ok(Json(agent_dto(&handle)))
}

async fn health() -> &'static str {
    "OK"
}

pub fn create_router() -> Router<Arc<AgentsState>> {
    Router::new()
        .route("/health", get(health))
        .route("/strategies", get(list_strategies))
        .route("/strategies/validate", post(validate_strategy))
        .route("/strategies/:id", get(get_strategy))
        .route("/agents", get(list_agents).post(create_agent))
        .route(
            "/agents/:id",
            get(get_agent).patch(update_agent).delete(delete_agent),
        )
        .route("/agents/:id/start", post(start_agent))
        .route("/agents/:id/stop", post(stop_agent))
        .route("/agents/:id/pause", post(pause_agent))
}
