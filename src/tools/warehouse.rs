// src/tools/warehouse.rs
// SQL warehouse client and the query-execution tool

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::Tool;
use crate::config::DexConfig;
use crate::error::PipelineError;

/// Executes SQL statements against the warehouse HTTP API. Read-only use is
/// a prompt-level contract; the client does not inspect statements.
pub struct WarehouseClient {
    client: Client,
    statements_url: String,
    warehouse_id: String,
    token: String,
}

impl WarehouseClient {
    pub fn new(config: &DexConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        Ok(Self {
            client,
            statements_url: format!("{}/api/2.0/sql/statements", config.warehouse_host),
            warehouse_id: config.warehouse_id.clone(),
            token: config.warehouse_token.clone(),
        })
    }

    /// Run one statement and return its rows as objects keyed by column name.
    pub async fn execute(&self, sql: &str) -> Result<Vec<Value>, String> {
        debug!(statement = %sql.chars().take(120).collect::<String>(), "executing warehouse statement");

        let response = self
            .client
            .post(&self.statements_url)
            .bearer_auth(&self.token)
            .json(&json!({
                "statement": sql,
                "warehouse_id": self.warehouse_id,
                "wait_timeout": "30s",
            }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(format!("warehouse error {}: {}", status, detail));
        }

        let raw: Value = response.json().await.map_err(|e| e.to_string())?;

        if raw["status"]["state"].as_str() == Some("FAILED") {
            let message = raw["status"]["error"]["message"]
                .as_str()
                .unwrap_or("statement failed");
            return Err(message.to_string());
        }

        Ok(rows_from_result(&raw))
    }

    pub async fn describe(&self, table: &str) -> Result<Vec<Value>, String> {
        self.execute(&format!("DESCRIBE {}", table)).await
    }
}

/// Zip the column manifest with the data rows.
fn rows_from_result(raw: &Value) -> Vec<Value> {
    let columns: Vec<String> = raw["manifest"]["schema"]["columns"]
        .as_array()
        .map(|cols| {
            cols.iter()
                .filter_map(|c| c["name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let Some(data) = raw["result"]["data_array"].as_array() else {
        return Vec::new();
    };

    data.iter()
        .filter_map(|row| row.as_array())
        .map(|row| {
            let mut object = Map::new();
            for (i, cell) in row.iter().enumerate() {
                let key = columns
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("col{}", i));
                object.insert(key, cell.clone());
            }
            Value::Object(object)
        })
        .collect()
}

/// Tool wrapper: SQL in, rows (or an error string the model reacts to) out.
pub struct FetchRecordTool {
    warehouse: Arc<WarehouseClient>,
}

impl FetchRecordTool {
    pub fn new(warehouse: Arc<WarehouseClient>) -> Self {
        Self { warehouse }
    }
}

#[async_trait]
impl Tool for FetchRecordTool {
    fn name(&self) -> &'static str {
        "fetch_record"
    }

    fn description(&self) -> &'static str {
        "Executes the provided SQL query against the connected database and returns the fetched rows."
    }

    async fn call(&self, input: &str) -> Result<String, PipelineError> {
        match self.warehouse.execute(input.trim()).await {
            Ok(rows) => Ok(serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string())),
            Err(e) => Ok(format!("Failed Error: {}", e)),
        }
    }
}
