// tests/test_helpers.rs
// Shared fixtures: a scripted model client, stub tools, and a pipeline
// wired to an in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use dex::chat::ledger::RateCard;
use dex::chat::pipeline::{ChatPipeline, PipelineSettings, ToolSuite};
use dex::error::PipelineError;
use dex::llm::{Completion, ModelClient, StreamEvent, TokenUsage};
use dex::store::SqliteStore;
use dex::tools::{Tool, ToolRegistry};

/// Token usage attributed to every scripted model call
pub const SCRIPT_INPUT_TOKENS: u32 = 100;
pub const SCRIPT_OUTPUT_TOKENS: u32 = 10;

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    RateLimited,
    Error(String),
}

pub fn text(reply: &str) -> ScriptedReply {
    ScriptedReply::Text(reply.to_string())
}

/// A model client that replays a fixed script of replies. When the script
/// runs dry it serves the fallback reply, if one is set.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<String>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, reply: &str) -> Self {
        self.fallback = Some(reply.to_string());
        self
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    fn next_reply(&self) -> Result<String, PipelineError> {
        let scripted = self.replies.lock().unwrap().pop_front();
        match scripted {
            Some(ScriptedReply::Text(reply)) => Ok(reply),
            Some(ScriptedReply::RateLimited) => {
                Err(PipelineError::RateLimited("model API error 429: RateLimitReached".into()))
            }
            Some(ScriptedReply::Error(detail)) => Err(PipelineError::Model(detail)),
            None => match &self.fallback {
                Some(reply) => Ok(reply.clone()),
                None => Err(PipelineError::Model("scripted model exhausted".into())),
            },
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }

    async fn invoke(&self, _prompt: &str) -> Result<Completion, PipelineError> {
        let reply = self.next_reply()?;
        Ok(Completion {
            text: reply,
            usage: TokenUsage::new(SCRIPT_INPUT_TOKENS, SCRIPT_OUTPUT_TOKENS),
        })
    }

    async fn stream(&self, _prompt: &str) -> Result<mpsc::Receiver<StreamEvent>, PipelineError> {
        let reply = self.next_reply()?;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for piece in reply.split_inclusive(' ') {
                if tx.send(StreamEvent::TextDelta(piece.to_string())).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(StreamEvent::Usage(TokenUsage::new(
                    SCRIPT_INPUT_TOKENS,
                    SCRIPT_OUTPUT_TOKENS,
                )))
                .await;
            let _ = tx.send(StreamEvent::Done).await;
        });
        Ok(rx)
    }
}

/// A tool returning a fixed observation.
pub struct StubTool {
    name: &'static str,
    output: String,
}

impl StubTool {
    pub fn new(name: &'static str, output: &str) -> Self {
        Self { name, output: output.to_string() }
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Stubbed tool for tests."
    }

    async fn call(&self, _input: &str) -> Result<String, PipelineError> {
        Ok(self.output.clone())
    }
}

pub fn test_rates() -> RateCard {
    RateCard { input_per_million: 2.50, output_per_million: 10.00 }
}

/// Pipeline over an in-memory store with stub tools in every registry.
pub async fn build_pipeline(model: Arc<ScriptedModel>) -> (Arc<ChatPipeline>, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::connect("sqlite::memory:", 1).await.unwrap());
    store.migrate().await.unwrap();

    let tools = ToolSuite {
        query: ToolRegistry::new(vec![Arc::new(StubTool::new(
            "fetch_record",
            r#"[{"dentists": 17060}]"#,
        ))]),
        metadata: ToolRegistry::new(vec![Arc::new(StubTool::new(
            "column_metadata_extractor",
            r#"[{"colname": "dent", "tablename": "sem_ahrf_state_national_survey"}]"#,
        ))]),
        mapping: ToolRegistry::new(vec![Arc::new(StubTool::new(
            "sohea_mapping_file_reader",
            r#"{"Q5": {"parent": "Q1", "levels": ["1", "2"]}}"#,
        ))]),
    };

    let settings = PipelineSettings {
        rates: test_rates(),
        history_turn_cap: 5,
        loop_max_iterations: 25,
        repair_max_attempts: 5,
        mapping_dir: std::env::temp_dir(),
    };

    let pipeline = Arc::new(ChatPipeline::new(model, store.clone(), store.clone(), tools, settings));
    (pipeline, store)
}

// ── Common scripted replies ──

pub fn intent_short_circuit(response: &str) -> ScriptedReply {
    text(&format!(
        r#"{{"context_required": false, "chatId": [], "response": "{}",
            "run_downstream_llm": false, "rephrased_query": ""}}"#,
        response
    ))
}

pub fn intent_downstream(rephrased: &str) -> ScriptedReply {
    text(&format!(
        r#"{{"context_required": true, "chatId": [], "response": "",
            "run_downstream_llm": true, "rephrased_query": "{}"}}"#,
        rephrased
    ))
}

pub fn final_answer_directive(answer: &str) -> ScriptedReply {
    text(&format!(r#"{{"thought": "done", "final_answer": "{}"}}"#, answer))
}

pub fn action_directive(tool: &str, input: &str) -> ScriptedReply {
    text(&format!(
        r#"{{"thought": "use a tool", "action": {{"tool": "{}", "input": "{}"}}}}"#,
        tool, input
    ))
}

pub const EMPTY_SUMMARY: &str =
    r#"{"sqlCode": "", "visualization": null, "followups": [], "viewVisualization": false}"#;
