// src/llm/mod.rs
// Model client trait and shared types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::PipelineError;

pub mod azure;

pub use azure::{AzureEmbeddingClient, AzureModelClient};

/// Token counts for one model call. On streaming calls the totals are only
/// meaningful on the final `Usage` event.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self { input_tokens, output_tokens }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A completed (non-streaming) model call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Events produced by a streaming model call.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    Usage(TokenUsage),
    Error(String),
    Done,
}

/// Universal model interface. One prompt in, generated text plus token
/// counts out; `stream` produces the same text incrementally.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Client name for logging
    fn name(&self) -> &'static str;

    /// Model identifier recorded on persisted turns
    fn model_name(&self) -> &str;

    async fn invoke(&self, prompt: &str) -> Result<Completion, PipelineError>;

    async fn stream(&self, prompt: &str) -> Result<mpsc::Receiver<StreamEvent>, PipelineError>;
}

/// Embedding interface used by the search index client.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError>;
}
