// src/server/handlers.rs
// Route handlers. Every endpoint answers the JSON envelope the front-end
// expects: 200 with the payload, 500 with a generic message.

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use tracing::{error, info};

use super::types::{
    ChatAgentRequest, HistoryQuery, MetadataQuery, SessionsQuery, UpdateFlagsRequest,
};
use super::AppState;
use crate::chat::TurnRequest;
use crate::datasource::DataSource;
use crate::error::RETRY_LATER_MESSAGE;
use crate::store::SessionRecord;

/// Sessions listed per data source for one user
const SESSION_LIST_CAP: usize = 10;

fn success_response(payload: Value) -> Response {
    (StatusCode::OK, Json(payload)).into_response()
}

fn error_response(message: impl Into<String>) -> Response {
    let message: String = message.into();
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!(message))).into_response()
}

/// Strip newline characters that would corrupt structured log lines.
fn sanitize(value: &str) -> String {
    value.replace(['\n', '\r'], "")
}

fn decode_prompt(encoded: &str) -> Result<String, String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("base64 decode failed: {}", e))?;
    let text = String::from_utf8(decoded).map_err(|e| format!("prompt is not UTF-8: {}", e))?;
    Ok(urlencoding::decode(&text)
        .map(|s| s.into_owned())
        .unwrap_or(text))
}

pub async fn health_check() -> Response {
    success_response(json!("Application is running successfully !"))
}

pub async fn chat_agent(
    State(state): State<AppState>,
    Json(request): Json<ChatAgentRequest>,
) -> Response {
    let session_id = sanitize(&request.session_id);
    let user_id = sanitize(&request.user_email);

    let Some(data_source) = DataSource::parse(&request.data_source) else {
        return error_response(format!("Invalid datasource: {}", sanitize(&request.data_source)));
    };

    let prompt = match decode_prompt(&request.user_prompt) {
        Ok(prompt) => prompt,
        Err(e) => {
            error!(session_id = %session_id, "prompt decode failed: {}", e);
            return error_response(RETRY_LATER_MESSAGE);
        }
    };

    info!(session_id = %session_id, datasource = data_source.as_str(), "request received to assistant");

    // First turn of a session creates its record; later turns hit the
    // conflict arm and leave it alone.
    let now = chrono::Utc::now().to_rfc3339();
    let session = SessionRecord {
        id: SessionRecord::identity(&user_id, &session_id),
        user_id: user_id.clone(),
        session_id: session_id.clone(),
        session_name: prompt.clone(),
        data_source: data_source.as_str().to_string(),
        application_name: data_source.application_name().to_string(),
        inserted_at: now.clone(),
        last_updated_at: now,
        is_favorite: false,
        is_deleted: false,
    };
    if let Err(e) = state.sessions.insert(&session).await {
        error!(session_id = %session_id, "session insert failed: {}", e);
        return error_response(RETRY_LATER_MESSAGE);
    }

    let turn = TurnRequest::new(session_id, user_id, data_source, prompt);
    let stream = state
        .pipeline
        .clone()
        .run_turn(turn)
        .map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk)));

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(stream))
    {
        Ok(response) => response,
        Err(e) => {
            error!("stream response build failed: {}", e);
            error_response(RETRY_LATER_MESSAGE)
        }
    }
}

pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SessionsQuery>,
) -> Response {
    let user_id = sanitize(&query.user_email);
    let research_user = headers
        .get("Isresearch")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let datasources = match state.sessions.distinct_datasources(&user_id).await {
        Ok(list) => list,
        Err(e) => {
            error!(user_id = %user_id, "error occurred while fetching sessions: {}", e);
            return error_response(RETRY_LATER_MESSAGE);
        }
    };

    let mut sessions = Vec::new();
    for name in datasources {
        let Some(source) = DataSource::parse(&name) else {
            continue;
        };
        // Research users only see research sessions; everyone else never does
        if research_user != source.is_research() {
            continue;
        }
        match state.sessions.sessions_for(&user_id, &name, SESSION_LIST_CAP).await {
            Ok(batch) => sessions.extend(batch),
            Err(e) => {
                error!(user_id = %user_id, "error occurred while fetching sessions: {}", e);
                return error_response(RETRY_LATER_MESSAGE);
            }
        }
    }

    success_response(json!({"userId": user_id, "sessions": sessions}))
}

pub async fn session_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let session_id = sanitize(&query.session_id);
    let user_id = sanitize(&query.user_email);

    match state.turns.session_history(&user_id, &session_id).await {
        Ok(messages) => success_response(json!({"sessionId": session_id, "messages": messages})),
        Err(e) => {
            error!(session_id = %session_id, "error occurred while fetching chat history: {}", e);
            error_response(RETRY_LATER_MESSAGE)
        }
    }
}

pub async fn datasource_metadata(
    State(state): State<AppState>,
    Query(query): Query<MetadataQuery>,
) -> Response {
    let Some(source) = DataSource::parse(&sanitize(&query.datasource)) else {
        return error_response("Datasource not configured !!");
    };

    let details = state.metadata.describe(source).await;
    match serde_json::to_value(&details) {
        Ok(payload) => success_response(payload),
        Err(e) => {
            error!(datasource = source.as_str(), "error occurred while fetching metadata: {}", e);
            error_response(RETRY_LATER_MESSAGE)
        }
    }
}

pub async fn update_chat_flags(
    State(state): State<AppState>,
    Json(request): Json<UpdateFlagsRequest>,
) -> Response {
    let session_id = sanitize(&request.session_id);
    let user_id = sanitize(&request.user_email);

    let record = match state.turns.get_turn(&user_id, &session_id, request.chat_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return error_response(format!("No chat record {} in session", request.chat_id)),
        Err(e) => {
            error!(session_id = %session_id, "flag update lookup failed: {}", e);
            return error_response(RETRY_LATER_MESSAGE);
        }
    };

    let mut record = record;
    if request.show_sql {
        record.show_sql = true;
    } else if request.show_visualization {
        record.show_visualization = true;
    }

    match state.turns.update(&record.id, &record).await {
        Ok(()) => success_response(json!({"status": "Record updated successfully"})),
        Err(e) => {
            error!(session_id = %session_id, "flag update failed: {}", e);
            error_response(RETRY_LATER_MESSAGE)
        }
    }
}
