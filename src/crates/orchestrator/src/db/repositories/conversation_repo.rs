//! Conversation-variable persistence, keyed by `(bot_id, session_id, key)`.

use crate::db::connection::DatabasePool;
use serde_json::{Map, Value};
use sqlx::Row;
use uuid::Uuid;

/// Repository for `conversation_variables`.
pub struct ConversationRepository;

impl ConversationRepository {
    /// All variables of one session as a map.
    pub async fn load(
        pool: &DatabasePool,
        bot_id: &str,
        session_id: &str,
    ) -> Result<Map<String, Value>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT key, value FROM conversation_variables
             WHERE bot_id = $1 AND session_id = $2",
        )
        .bind(bot_id)
        .bind(session_id)
        .fetch_all(pool)
        .await?;

        let mut map = Map::new();
        for row in rows {
            let key: String = row.get("key");
            let value: Option<Value> = row.get("value");
            map.insert(key, value.unwrap_or(Value::Null));
        }
        Ok(map)
    }

    /// Upsert one variable.
    pub async fn set(
        pool: &DatabasePool,
        bot_id: &str,
        session_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO conversation_variables (id, bot_id, session_id, key, value)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (bot_id, session_id, key)
             DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(bot_id)
        .bind(session_id)
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Drop all variables of one session.
    pub async fn clear_session(
        pool: &DatabasePool,
        bot_id: &str,
        session_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM conversation_variables WHERE bot_id = $1 AND session_id = $2",
        )
        .bind(bot_id)
        .bind(session_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
