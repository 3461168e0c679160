//! Append-only interaction log.
//!
//! One record per answered (or rate limited, or failed) question. Writes are
//! best effort: the dispatcher fires them on a separate task and only warns
//! when they fail.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;

/// How a logged turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcomeKind {
    AnsweredFromKnowledgeBase,
    AnsweredGeneratively,
    RateLimited,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    /// Unique per record so entries from concurrent turns never collide.
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub username: String,
    pub prompt: String,
    pub keywords: Vec<String>,
    pub keyword_summary: String,
    pub categories: String,
    /// Elapsed time of the answering call; `None` when nothing was answered.
    pub response_time_ms: Option<u64>,
    pub is_rate_limited: bool,
    pub outcome: TurnOutcomeKind,
}

/// Sink for interaction records.
#[async_trait]
pub trait InteractionLogger: Send + Sync {
    async fn append(&self, record: &InteractionRecord) -> Result<()>;
}

/// Appends records as JSON lines to a file.
pub struct JsonlInteractionLogger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlInteractionLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl InteractionLogger for JsonlInteractionLogger {
    async fn append(&self, record: &InteractionRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Emits records as tracing events when no log file is configured.
pub struct TracingInteractionLogger;

#[async_trait]
impl InteractionLogger for TracingInteractionLogger {
    async fn append(&self, record: &InteractionRecord) -> Result<()> {
        info!(
            id = %record.id,
            user_id = %record.user_id,
            username = %record.username,
            keywords = %record.keyword_summary,
            categories = %record.categories,
            response_time_ms = ?record.response_time_ms,
            rate_limited = record.is_rate_limited,
            outcome = ?record.outcome,
            "interaction"
        );
        Ok(())
    }
}
