// src/store/mod.rs
// Durable store contract for sessions and turns

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chat::response::FinalResponse;
use crate::error::PipelineError;

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Result of an insert: a pre-existing identity is reported, not raised,
/// so callers can convert the insert into an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

/// The persisted, billable record of one turn. Field names are the wire
/// names the front-end reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    #[serde(flatten)]
    pub summary: FinalResponse,
    #[serde(rename = "chatId")]
    pub chat_id: i64,
    pub id: String,
    #[serde(rename = "insertedAt")]
    pub inserted_at: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "showSql", default)]
    pub show_sql: bool,
    #[serde(rename = "showVisualization", default)]
    pub show_visualization: bool,
    pub prompt: String,
    #[serde(rename = "rephrasedPrompt")]
    pub rephrased_prompt: String,
    pub response: String,
    pub total_input_tokens: u32,
    pub total_output_tokens: u32,
    pub modelname: String,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    #[serde(rename = "dataSource")]
    pub data_source: String,
    #[serde(rename = "applicationName")]
    pub application_name: String,
}

impl TurnRecord {
    /// Deterministic identity: session id plus the per-session turn index.
    pub fn identity(session_id: &str, chat_id: i64) -> String {
        format!("{}-{}", session_id, chat_id)
    }
}

/// A logical conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "sessionName")]
    pub session_name: String,
    #[serde(rename = "dataSource")]
    pub data_source: String,
    #[serde(rename = "applicationName")]
    pub application_name: String,
    #[serde(rename = "insertedAt")]
    pub inserted_at: String,
    #[serde(rename = "lastUpdatedAt")]
    pub last_updated_at: String,
    #[serde(rename = "isFavorite")]
    pub is_favorite: bool,
    #[serde(rename = "isDeleted")]
    pub is_deleted: bool,
}

impl SessionRecord {
    pub fn identity(user_id: &str, session_id: &str) -> String {
        format!("{}-{}", user_id, session_id)
    }
}

/// The slice of a prior turn loaded as context for the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorTurn {
    #[serde(rename = "chatId")]
    pub chat_id: i64,
    #[serde(default)]
    pub prompt: String,
    #[serde(rename = "rephrasedPrompt", default)]
    pub rephrased_prompt: String,
    #[serde(rename = "sqlCode", default)]
    pub sql_code: String,
    #[serde(default)]
    pub response: String,
}

#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn insert(&self, record: &TurnRecord) -> Result<InsertOutcome, PipelineError>;

    async fn update(&self, id: &str, record: &TurnRecord) -> Result<(), PipelineError>;

    /// Highest turn index already stored for a session, if any.
    async fn latest_chat_id(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<i64>, PipelineError>;

    /// The last `limit` turns, most recent first.
    async fn recent_turns(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<PriorTurn>, PipelineError>;

    async fn get_turn(
        &self,
        user_id: &str,
        session_id: &str,
        chat_id: i64,
    ) -> Result<Option<TurnRecord>, PipelineError>;

    /// Every turn of a session in chronological order.
    async fn session_history(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<TurnRecord>, PipelineError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, record: &SessionRecord) -> Result<InsertOutcome, PipelineError>;

    async fn update(&self, id: &str, record: &SessionRecord) -> Result<(), PipelineError>;

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, PipelineError>;

    async fn distinct_datasources(&self, user_id: &str) -> Result<Vec<String>, PipelineError>;

    async fn sessions_for(
        &self,
        user_id: &str,
        data_source: &str,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, PipelineError>;
}
