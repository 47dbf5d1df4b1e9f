// src/chat/steps.rs
// Turn request and the mutable working state threaded through the pipeline

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::datasource::DataSource;
use crate::llm::TokenUsage;

/// One user utterance in a session. Immutable after creation.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub user_id: String,
    pub data_source: DataSource,
    pub prompt: String,
    pub received_at: DateTime<Utc>,
}

impl TurnRequest {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        data_source: DataSource,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            data_source,
            prompt: prompt.into(),
            received_at: Utc::now(),
        }
    }
}

/// One logged unit of intermediate reasoning or output. The log is
/// append-only and its order feeds later prompts verbatim.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AgentStep {
    UserQuestion {
        user_question: String,
    },
    Rephrase {
        #[serde(rename = "rephrasedQueries")]
        rephrased_queries: String,
    },
    /// A prior turn the intent classifier referenced by chat id
    PriorTurn(Value),
    /// The intent classifier's direct reply on short-circuited turns
    DirectReply(String),
    /// Trace of one reasoning loop, labeled by stage
    LoopTrace {
        label: &'static str,
        entries: Vec<String>,
    },
}

/// Mutable working state for one turn. Owned exclusively by the turn's
/// control flow; discarded after persistence.
#[derive(Debug, Default)]
pub struct TurnState {
    pub rephrased_query: String,
    steps: Vec<AgentStep>,
    pub streamed: String,
    pub usage: TokenUsage,
}

impl TurnState {
    pub fn new(prompt: &str) -> Self {
        let mut state = Self::default();
        state.push_step(AgentStep::UserQuestion {
            user_question: prompt.to_string(),
        });
        state
    }

    /// Append one step. Earlier entries are never rewritten.
    pub fn push_step(&mut self, step: AgentStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[AgentStep] {
        &self.steps
    }

    pub fn add_usage(&mut self, usage: &TokenUsage) {
        self.usage.add(usage);
    }

    /// The step log as prompt context.
    pub fn render_steps(&self) -> String {
        serde_json::to_string_pretty(&self.steps).unwrap_or_default()
    }
}
