// src/server/types.rs
// Request payloads, mirroring the front-end's field names

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ChatAgentRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Base64- and URL-encoded prompt text
    #[serde(rename = "userPrompt")]
    pub user_prompt: String,
    #[serde(rename = "dataSource")]
    pub data_source: String,
    #[serde(rename = "userEmail")]
    pub user_email: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFlagsRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "chatId")]
    pub chat_id: i64,
    #[serde(rename = "userEmail")]
    pub user_email: String,
    #[serde(rename = "showSql", default)]
    pub show_sql: bool,
    #[serde(rename = "showVisualization", default)]
    pub show_visualization: bool,
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    #[serde(rename = "userEmail")]
    pub user_email: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "userEmail")]
    pub user_email: String,
}

#[derive(Debug, Deserialize)]
pub struct MetadataQuery {
    pub datasource: String,
}
