// src/llm/azure.rs
// Azure OpenAI-compatible model client (chat completions + embeddings)

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Completion, EmbeddingClient, ModelClient, StreamEvent, TokenUsage};
use crate::config::DexConfig;
use crate::error::PipelineError;

use futures::StreamExt;

/// Channel depth for streaming deltas
const STREAM_BUFFER: usize = 64;

pub struct AzureModelClient {
    client: Client,
    url: String,
    api_key: String,
    model_name: String,
    max_retries: u32,
}

impl AzureModelClient {
    pub fn new(config: &DexConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.model_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        Ok(Self {
            client,
            url: config.model_api_url(),
            api_key: config.model_api_key.clone(),
            model_name: config.model_name.clone(),
            max_retries: config.model_max_retries,
        })
    }

    fn request_body(&self, prompt: &str, stream: bool) -> Value {
        let mut body = json!({
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
        });
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, PipelineError> {
        // One transport-level retry; rate limits are not retried here, they
        // surface to the turn's top-level error policy.
        let mut attempt = 0;
        loop {
            let result = self
                .client
                .post(&self.url)
                .header("api-key", &self.api_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    if status.is_server_error() && attempt < self.max_retries {
                        attempt += 1;
                        let jitter = rand::rng().random_range(50..250);
                        warn!(status = %status, attempt, "model call failed, retrying");
                        tokio::time::sleep(Duration::from_millis(jitter)).await;
                        continue;
                    }
                    return Err(PipelineError::from_model_failure(
                        Some(status),
                        format!("model API error {}: {}", status, detail),
                    ));
                }
                Err(e) => {
                    if (e.is_timeout() || e.is_connect()) && attempt < self.max_retries {
                        attempt += 1;
                        warn!(attempt, "model call transport error, retrying: {}", e);
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

#[derive(Deserialize, Debug)]
struct ChatStreamChunk {
    choices: Option<Vec<ChatStreamChoice>>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize, Debug)]
struct ChatStreamChoice {
    delta: Option<ChatStreamDelta>,
}

#[derive(Deserialize, Debug)]
struct ChatStreamDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl ModelClient for AzureModelClient {
    fn name(&self) -> &'static str {
        "azure-openai"
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn invoke(&self, prompt: &str) -> Result<Completion, PipelineError> {
        let start = Instant::now();
        let body = self.request_body(prompt, false);
        let response = self.send(&body).await?;
        let raw: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let text = raw["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| PipelineError::MalformedOutput("no content in model response".into()))?
            .to_string();

        let usage = TokenUsage::new(
            raw["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            raw["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        );

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "model invoke complete"
        );

        Ok(Completion { text, usage })
    }

    async fn stream(&self, prompt: &str) -> Result<mpsc::Receiver<StreamEvent>, PipelineError> {
        let body = self.request_body(prompt, true);
        let response = self.send(&body).await?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Process complete SSE lines
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line == "data: [DONE]" {
                        continue;
                    }

                    if let Some(json_str) = line.strip_prefix("data: ") {
                        if let Ok(chunk) = serde_json::from_str::<ChatStreamChunk>(json_str) {
                            if let Some(choices) = chunk.choices {
                                for choice in choices {
                                    if let Some(content) =
                                        choice.delta.and_then(|d| d.content)
                                    {
                                        if tx.send(StreamEvent::TextDelta(content)).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                            if let Some(usage) = chunk.usage {
                                let _ = tx
                                    .send(StreamEvent::Usage(TokenUsage::new(
                                        usage.prompt_tokens,
                                        usage.completion_tokens,
                                    )))
                                    .await;
                            }
                        }
                    }
                }
            }

            let _ = tx.send(StreamEvent::Done).await;
        });

        Ok(rx)
    }
}

pub struct AzureEmbeddingClient {
    client: Client,
    url: String,
    api_key: String,
}

impl AzureEmbeddingClient {
    pub fn new(config: &DexConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.model_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        Ok(Self {
            client,
            url: config.embedding_api_url(),
            api_key: config.model_api_key.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingClient for AzureEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&json!({"input": text}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::from_model_failure(
                Some(status),
                format!("embedding API error {}: {}", status, detail),
            ));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let vector = raw["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| PipelineError::MalformedOutput("no embedding in response".into()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(vector)
    }
}
