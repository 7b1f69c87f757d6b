//! Document lifecycle row model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Document processing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Queued => "queued",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Done => "done",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `documents`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub document_id: String,
    pub bot_id: String,
    pub user_id: Option<String>,
    pub filename: String,
    pub size: i64,
    pub status: String,
    pub retry_count: i32,
    pub chunk_count: Option<i32>,
    pub error_message: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_sec: Option<i64>,
    pub embedded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        document_id: impl Into<String>,
        bot_id: impl Into<String>,
        filename: impl Into<String>,
        size: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            document_id: document_id.into(),
            bot_id: bot_id.into(),
            user_id: None,
            filename: filename.into(),
            size,
            status: DocumentStatus::Queued.as_str().to_string(),
            retry_count: 0,
            chunk_count: None,
            error_message: None,
            processing_started_at: None,
            completed_at: None,
            processing_time_sec: None,
            embedded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status == DocumentStatus::Done.as_str()
            || self.status == DocumentStatus::Failed.as_str()
    }
}
