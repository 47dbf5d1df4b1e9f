// src/tools/search.rs
// Vector/semantic search client over the catalog and research indexes

use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::DexConfig;
use crate::error::PipelineError;
use crate::llm::EmbeddingClient;

/// Nearest-neighbour count for the vector leg of a hybrid query
const VECTOR_KNN: usize = 20;

/// One search request as the metadata tool receives it.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub datasource: String,
    pub tables: Vec<String>,
    pub filenames: Vec<String>,
    pub yearnumber: Option<String>,
}

impl SearchRequest {
    /// Filter expression combining datasource with table/filename/year scoping.
    fn filter(&self) -> String {
        // The research corpus is indexed with a lowercase source tag, the
        // survey catalogs with uppercase.
        let tag = if self.datasource.eq_ignore_ascii_case("research") {
            self.datasource.to_lowercase()
        } else {
            self.datasource.to_uppercase()
        };
        let mut filter = format!("datasource eq '{}'", tag);

        if !self.tables.is_empty() {
            let tables = self
                .tables
                .iter()
                .map(|t| format!("targettable eq '{}'", t))
                .collect::<Vec<_>>()
                .join(" or ");
            filter = format!("{} and ({})", filter, tables);
        } else if !self.filenames.is_empty() {
            let files = self
                .filenames
                .iter()
                .map(|f| format!("filename eq '{}'", f))
                .collect::<Vec<_>>()
                .join(" or ");
            filter = format!("{} and ({})", filter, files);
        }

        if let Some(year) = &self.yearnumber {
            filter = format!("{} and yearnumber eq '{}'", filter, year);
        }

        filter
    }
}

pub struct SearchIndexClient {
    client: Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    embedder: Arc<dyn EmbeddingClient>,
}

impl SearchIndexClient {
    pub fn new(config: &DexConfig, embedder: Arc<dyn EmbeddingClient>) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.search_endpoint.clone(),
            api_key: config.search_api_key.clone(),
            api_version: config.search_api_version.clone(),
            embedder,
        })
    }

    /// Hybrid (semantic + vector) query against one index. Rows carry the
    /// requested fields, with `targettable` surfaced as `tablename`.
    pub async fn query(
        &self,
        index: &str,
        request: &SearchRequest,
        select: &[&str],
        top: usize,
    ) -> Result<Vec<Value>, String> {
        let vector = self
            .embedder
            .embed(&request.query)
            .await
            .map_err(|e| e.to_string())?;

        let filter = request.filter();
        debug!(index, %filter, top, "search index query");

        let url = format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint, index, self.api_version
        );

        let body = json!({
            "search": request.query,
            "vectorQueries": [{
                "kind": "vector",
                "vector": vector,
                "kNearestNeighbors": VECTOR_KNN,
                "fields": "content_vector",
            }],
            "top": top,
            "select": select.join(","),
            "filter": filter,
            "queryType": "semantic",
            "semanticConfiguration": "sem-config",
        });

        let response = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(format!("search error {}: {}", status, detail));
        }

        let raw: Value = response.json().await.map_err(|e| e.to_string())?;
        let Some(docs) = raw["value"].as_array() else {
            return Ok(Vec::new());
        };

        let rows = docs
            .iter()
            .map(|doc| {
                let mut row = Map::new();
                for field in select {
                    if *field == "id" {
                        continue;
                    }
                    let key = if *field == "targettable" { "tablename" } else { field };
                    row.insert(
                        key.to_string(),
                        doc.get(*field).cloned().unwrap_or(Value::String(String::new())),
                    );
                }
                Value::Object(row)
            })
            .collect();

        Ok(rows)
    }
}
