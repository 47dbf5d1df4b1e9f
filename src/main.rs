// src/main.rs

use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use dex::chat::ledger::RateCard;
use dex::chat::pipeline::{ChatPipeline, PipelineSettings, ToolSuite};
use dex::config::DexConfig;
use dex::llm::{AzureEmbeddingClient, AzureModelClient};
use dex::metadata::MetadataService;
use dex::server::{router, AppState};
use dex::store::SqliteStore;
use dex::tools::{
    ColumnMetadataTool, FetchRecordTool, MappingFileTool, SearchIndexClient, ToolRegistry,
    WarehouseClient,
};

#[derive(Parser, Debug)]
#[command(name = "dex", about = "Conversational analytics backend for the health data explorer")]
struct Cli {
    /// Bind host override
    #[arg(long)]
    host: Option<String>,

    /// Bind port override
    #[arg(long)]
    port: Option<u16>,

    /// Database URL override
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DexConfig::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    let config = Arc::new(config);

    let level = config.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting data explorer backend");
    info!("Model: {}", config.model_name);

    let store = Arc::new(
        SqliteStore::connect(&config.database_url, config.sqlite_max_connections).await?,
    );
    store.migrate().await?;

    let model = Arc::new(AzureModelClient::new(&config)?);
    let embedder = Arc::new(AzureEmbeddingClient::new(&config)?);
    let warehouse = Arc::new(WarehouseClient::new(&config)?);
    let search = Arc::new(SearchIndexClient::new(&config, embedder)?);

    let tools = ToolSuite {
        query: ToolRegistry::new(vec![Arc::new(FetchRecordTool::new(warehouse.clone()))]),
        metadata: ToolRegistry::new(vec![Arc::new(ColumnMetadataTool::new(
            &config,
            warehouse.clone(),
            search,
        ))]),
        mapping: ToolRegistry::new(vec![Arc::new(MappingFileTool::new(
            config.sohea_mapping_dir.clone(),
        ))]),
    };

    let settings = PipelineSettings {
        rates: RateCard {
            input_per_million: config.model_input_cost,
            output_per_million: config.model_output_cost,
        },
        history_turn_cap: config.history_turn_cap,
        loop_max_iterations: config.loop_max_iterations,
        repair_max_attempts: config.repair_max_attempts,
        mapping_dir: config.sohea_mapping_dir.clone().into(),
    };

    let pipeline = Arc::new(ChatPipeline::new(
        model,
        store.clone(),
        store.clone(),
        tools,
        settings,
    ));

    let metadata = Arc::new(MetadataService::new(
        warehouse,
        config.db_schema.clone(),
        config.metadata_fanout_width,
    ));

    let state = AppState {
        config: config.clone(),
        pipeline,
        turns: store.clone(),
        sessions: store,
        metadata,
    };

    let app = router(state);
    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
