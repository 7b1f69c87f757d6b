//! Session-store implementation over the `conversation_variables` table.
//!
//! Writes from concurrent runs of the same `(bot_id, session_id)` are
//! serialized by a per-session mutex held only for the duration of one
//! flush, not the whole run.

use crate::db::repositories::ConversationRepository;
use crate::db::DatabasePool;
use async_trait::async_trait;
use dashmap::DashMap;
use flowgraph_core::services::{SessionStore, SessionStoreError};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Postgres-backed conversation store with per-session write serialization.
pub struct PgSessionStore {
    pool: DatabasePool,
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl PgSessionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool, locks: DashMap::new() }
    }

    fn lock_for(&self, bot_id: &str, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((bot_id.to_string(), session_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(
        &self,
        bot_id: &str,
        session_id: &str,
    ) -> Result<Map<String, Value>, SessionStoreError> {
        ConversationRepository::load(&self.pool, bot_id, session_id)
            .await
            .map_err(|e| SessionStoreError(e.to_string()))
    }

    async fn set(
        &self,
        bot_id: &str,
        session_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), SessionStoreError> {
        let lock = self.lock_for(bot_id, session_id);
        let _guard = lock.lock().await;
        ConversationRepository::set(&self.pool, bot_id, session_id, key, value)
            .await
            .map_err(|e| SessionStoreError(e.to_string()))
    }
}
