// src/server/mod.rs
// HTTP surface: request routing and shared application state

pub mod handlers;
pub mod types;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::chat::ChatPipeline;
use crate::config::DexConfig;
use crate::metadata::MetadataService;
use crate::store::{SessionStore, TurnStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DexConfig>,
    pub pipeline: Arc<ChatPipeline>,
    pub turns: Arc<dyn TurnStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub metadata: Arc<MetadataService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/agent/v1", post(handlers::chat_agent))
        .route("/api/sessions/v1", get(handlers::list_sessions))
        .route("/api/chathistory/v1", get(handlers::session_history))
        .route("/api/metadata/v1", get(handlers::datasource_metadata))
        .route("/api/updateflags/v1", post(handlers::update_chat_flags))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
