pub mod handlers;
pub mod routes;

use std::sync::Arc;

use crate::auth::api_key::{hash_api_key, ApiKeyCache};
use crate::config::ExchangeConfig;
use crate::db::Database;
use crate::services::matching::MatchingEngine;

/// Shared state for the exchange HTTP surface.
pub struct ExchangeState {
    pub config: ExchangeConfig,
    pub db: Database,
    pub engine: Arc<MatchingEngine>,
    pub api_keys: ApiKeyCache,
    pub admin_token_hash: String,
}

impl ExchangeState {
    pub fn new(config: ExchangeConfig, db: Database, engine: Arc<MatchingEngine>) -> Self {
        let admin_token_hash = hash_api_key(&config.admin_token);
        Self {
            config,
            db,
            engine,
            api_keys: ApiKeyCache::new(),
            admin_token_hash,
        }
    }
}
