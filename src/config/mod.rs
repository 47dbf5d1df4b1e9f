// src/config/mod.rs
// All tunables load from the environment (.env supported); the instance is
// built once in main and passed down explicitly.

use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct DexConfig {
    // ── Model Configuration
    pub model_endpoint: String,
    pub model_deployment: String,
    pub model_api_version: String,
    pub model_api_key: String,
    pub model_name: String,
    pub model_timeout_secs: u64,
    pub model_max_retries: u32,
    pub model_input_cost: f64,
    pub model_output_cost: f64,

    // ── Embedding Configuration
    pub embedding_deployment: String,
    pub embedding_api_version: String,

    // ── Search Index Configuration
    pub search_endpoint: String,
    pub search_api_key: String,
    pub search_api_version: String,
    pub catalog_search_index: String,
    pub sohea_search_index: String,
    pub medical_code_index: String,
    pub research_search_index: String,
    pub research_section_index: String,

    // ── SQL Warehouse Configuration
    pub warehouse_host: String,
    pub warehouse_id: String,
    pub warehouse_token: String,
    pub db_schema: String,

    // ── Storage Configuration
    pub database_url: String,
    pub sqlite_max_connections: u32,

    // ── Survey Mapping Files
    pub sohea_mapping_dir: String,

    // ── Pipeline Limits
    pub history_turn_cap: usize,
    pub loop_max_iterations: usize,
    pub repair_max_attempts: usize,
    pub metadata_fanout_width: usize,

    // ── Server Configuration
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            // Values may carry trailing comments copied from .env templates
            let clean_val = val.split('#').next().unwrap_or("").trim();
            clean_val.parse::<T>().unwrap_or(default)
        }
        Err(_) => default,
    }
}

impl DexConfig {
    pub fn from_env() -> Self {
        if dotenvy::dotenv().is_err() {
            eprintln!("Warning: .env file not found. Using environment variables and defaults.");
        }

        Self {
            model_endpoint: env_var_or("DEX_MODEL_ENDPOINT", "https://api.openai.azure.example".to_string()),
            model_deployment: env_var_or("DEX_MODEL_DEPLOYMENT", "gpt-4o".to_string()),
            model_api_version: env_var_or("DEX_MODEL_API_VERSION", "2024-06-01".to_string()),
            model_api_key: env_var_or("DEX_MODEL_API_KEY", String::new()),
            model_name: env_var_or("DEX_MODEL_NAME", "gpt-4o".to_string()),
            model_timeout_secs: env_var_or("DEX_MODEL_TIMEOUT_SECS", 30),
            model_max_retries: env_var_or("DEX_MODEL_MAX_RETRIES", 1),
            model_input_cost: env_var_or("DEX_MODEL_INPUT_COST", 2.50),
            model_output_cost: env_var_or("DEX_MODEL_OUTPUT_COST", 10.00),
            embedding_deployment: env_var_or("DEX_EMBEDDING_DEPLOYMENT", "text-embedding-3-large".to_string()),
            embedding_api_version: env_var_or("DEX_EMBEDDING_API_VERSION", "2024-06-01".to_string()),
            search_endpoint: env_var_or("DEX_SEARCH_ENDPOINT", "https://search.example.net".to_string()),
            search_api_key: env_var_or("DEX_SEARCH_API_KEY", String::new()),
            search_api_version: env_var_or("DEX_SEARCH_API_VERSION", "2023-11-01".to_string()),
            catalog_search_index: env_var_or("DEX_CATALOG_INDEX", "source-catalog-data-explorer".to_string()),
            sohea_search_index: env_var_or("DEX_SOHEA_INDEX", "sohea-catalog-data-explorer".to_string()),
            medical_code_index: env_var_or("DEX_MEDICAL_CODE_INDEX", "medical-code-data-explorer".to_string()),
            research_search_index: env_var_or("DEX_RESEARCH_INDEX", "research-articles".to_string()),
            research_section_index: env_var_or("DEX_RESEARCH_SECTION_INDEX", "research-article-sections".to_string()),
            warehouse_host: env_var_or("DEX_WAREHOUSE_HOST", "https://warehouse.example.net".to_string()),
            warehouse_id: env_var_or("DEX_WAREHOUSE_ID", String::new()),
            warehouse_token: env_var_or("DEX_WAREHOUSE_TOKEN", String::new()),
            db_schema: env_var_or("DEX_DB_SCHEMA", "analytics".to_string()),
            database_url: env_var_or("DATABASE_URL", "sqlite:./dex.db".to_string()),
            sqlite_max_connections: env_var_or("SQLITE_MAX_CONNECTIONS", 10),
            sohea_mapping_dir: env_var_or("DEX_SOHEA_MAPPING_DIR", "./mappings".to_string()),
            history_turn_cap: env_var_or("DEX_HISTORY_TURN_CAP", 5),
            loop_max_iterations: env_var_or("DEX_LOOP_MAX_ITERATIONS", 25),
            repair_max_attempts: env_var_or("DEX_REPAIR_MAX_ATTEMPTS", 5),
            metadata_fanout_width: env_var_or("DEX_METADATA_FANOUT_WIDTH", 10),
            host: env_var_or("DEX_HOST", "0.0.0.0".to_string()),
            port: env_var_or("DEX_PORT", 3001),
            log_level: env_var_or("DEX_LOG_LEVEL", "info".to_string()),
        }
    }

    /// Get server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Chat completions URL for the configured deployment
    pub fn model_api_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.model_endpoint, self.model_deployment, self.model_api_version
        )
    }

    /// Embeddings URL for the configured embedding deployment
    pub fn embedding_api_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.model_endpoint, self.embedding_deployment, self.embedding_api_version
        )
    }
}
