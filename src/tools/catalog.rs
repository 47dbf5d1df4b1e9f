// src/tools/catalog.rs
// Column/document metadata tool - routes one JSON request to the right
// backend: warehouse DESCRIBE, the research document index, or one of the
// catalog indexes.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::search::{SearchIndexClient, SearchRequest};
use super::warehouse::WarehouseClient;
use super::Tool;
use crate::config::DexConfig;
use crate::error::PipelineError;

/// Hard cap on research document hits per request
const RESEARCH_DOC_CAP: usize = 5;
/// Sections fetched per matched research document
const RESEARCH_SECTION_TOP: usize = 5;
/// Catalog hits returned per request
const CATALOG_TOP: usize = 50;
/// Code-lookup hits returned per request
const MEDICAL_CODE_TOP: usize = 100;

const CATALOG_FIELDS: &[&str] = &[
    "id",
    "colname",
    "targettable",
    "description",
    "sourcetable",
    "query_mode",
    "characteristics_desc",
];

const RESEARCH_FIELDS: &[&str] = &[
    "id",
    "content",
    "url",
    "title",
    "authors",
    "filename",
    "published_year",
];

const MEDICAL_CODE_FIELDS: &[&str] = &[
    "id",
    "colname",
    "value",
    "targettable",
    "description",
    "sourcetable",
    "query_mode",
];

#[derive(Debug, Deserialize)]
struct MetadataRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    datasource: String,
    #[serde(default)]
    selected_table_name: Vec<String>,
    #[serde(default)]
    filenames: Vec<String>,
    #[serde(default)]
    databricks_tables: Vec<String>,
    #[serde(default)]
    top_docs: Option<usize>,
    #[serde(default, rename = "whole_document_needed?")]
    whole_document_needed: Option<String>,
    #[serde(default)]
    yearnumber: Option<String>,
}

impl MetadataRequest {
    fn search_request(&self) -> SearchRequest {
        SearchRequest {
            query: self.query.clone(),
            datasource: self.datasource.clone(),
            tables: self.selected_table_name.clone(),
            filenames: self.filenames.clone(),
            yearnumber: self.yearnumber.clone(),
        }
    }
}

pub struct ColumnMetadataTool {
    warehouse: Arc<WarehouseClient>,
    search: Arc<SearchIndexClient>,
    catalog_index: String,
    sohea_index: String,
    medical_code_index: String,
    research_index: String,
    research_section_index: String,
    db_schema: String,
}

impl ColumnMetadataTool {
    pub fn new(
        config: &DexConfig,
        warehouse: Arc<WarehouseClient>,
        search: Arc<SearchIndexClient>,
    ) -> Self {
        Self {
            warehouse,
            search,
            catalog_index: config.catalog_search_index.clone(),
            sohea_index: config.sohea_search_index.clone(),
            medical_code_index: config.medical_code_index.clone(),
            research_index: config.research_search_index.clone(),
            research_section_index: config.research_section_index.clone(),
            db_schema: config.db_schema.clone(),
        }
    }

    fn code_lookup_tables(&self) -> [String; 3] {
        [
            format!("{}.reference.ref_cdt_code_lookup", self.db_schema),
            format!("{}.reference.ref_icd_code_lookup", self.db_schema),
            format!("{}.reference.ref_cpt_code_lookup", self.db_schema),
        ]
    }

    async fn describe_tables(&self, tables: &[String]) -> Result<String, String> {
        let mut table_info = Vec::new();
        for table in tables {
            let metadata = self.warehouse.describe(table).await?;
            table_info.push(json!({"tableName": table, "metadata": metadata}));
        }
        Ok(serde_json::to_string(&table_info).unwrap_or_default())
    }

    async fn research_lookup(&self, request: &MetadataRequest) -> Result<String, String> {
        let top = request.top_docs.unwrap_or(RESEARCH_DOC_CAP).min(RESEARCH_DOC_CAP);
        let search_request = request.search_request();
        let docs: Vec<Value> = self
            .search
            .query(&self.research_index, &search_request, RESEARCH_FIELDS, top)
            .await?;

        let whole_document = request
            .whole_document_needed
            .as_deref()
            .map(|v| !v.eq_ignore_ascii_case("no"))
            .unwrap_or(true);
        if !whole_document {
            return Ok(serde_json::to_string(&docs).unwrap_or_default());
        }

        // Drill into the per-document section index for each match
        let mut sections = Vec::new();
        for doc in &docs {
            let Some(filename) = doc["filename"].as_str() else {
                continue;
            };
            let mut section_request = search_request.clone();
            section_request.tables.clear();
            section_request.filenames = vec![filename.to_string()];
            let doc_sections = self
                .search
                .query(
                    &self.research_section_index,
                    &section_request,
                    RESEARCH_FIELDS,
                    RESEARCH_SECTION_TOP,
                )
                .await?;
            sections.extend(doc_sections);
        }

        Ok(serde_json::to_string(&sections).unwrap_or_default())
    }

    async fn catalog_lookup(&self, index: &str, request: &MetadataRequest) -> Result<String, String> {
        let rows = self
            .search
            .query(index, &request.search_request(), CATALOG_FIELDS, CATALOG_TOP)
            .await?;
        Ok(serde_json::to_string(&rows).unwrap_or_default())
    }

    async fn medical_code_lookup(&self, request: &MetadataRequest) -> Result<String, String> {
        let rows = self
            .search
            .query(
                &self.medical_code_index,
                &request.search_request(),
                MEDICAL_CODE_FIELDS,
                MEDICAL_CODE_TOP,
            )
            .await?;
        Ok(serde_json::to_string(&rows).unwrap_or_default())
    }

    async fn route(&self, request: &MetadataRequest) -> Result<String, String> {
        if !request.databricks_tables.is_empty() {
            return self.describe_tables(&request.databricks_tables).await;
        }

        match request.datasource.to_lowercase().as_str() {
            "research" => return self.research_lookup(request).await,
            "ahrf" | "hpsa" => return self.catalog_lookup(&self.catalog_index, request).await,
            "sohea" => return self.catalog_lookup(&self.sohea_index, request).await,
            _ => {}
        }

        let code_tables = self.code_lookup_tables();
        if request
            .selected_table_name
            .iter()
            .any(|t| code_tables.contains(t))
        {
            return self.medical_code_lookup(request).await;
        }

        Err(format!(
            "no metadata route for datasource '{}'",
            request.datasource
        ))
    }
}

#[async_trait]
impl Tool for ColumnMetadataTool {
    fn name(&self) -> &'static str {
        "column_metadata_extractor"
    }

    fn description(&self) -> &'static str {
        "Takes a JSON request with query and datasource and returns matching column metadata or document excerpts."
    }

    async fn call(&self, input: &str) -> Result<String, PipelineError> {
        let request: MetadataRequest = match serde_json::from_str(input) {
            Ok(r) => r,
            // Malformed tool input is an observation for the model, not a fault
            Err(e) => return Ok(format!("invalid request JSON: {}", e)),
        };

        match self.route(&request).await {
            Ok(rows) => Ok(rows),
            Err(e) => Ok(e),
        }
    }
}
