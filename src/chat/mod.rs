// src/chat/mod.rs
// The per-turn orchestration pipeline

pub mod agent_loop;
pub mod ledger;
pub mod pipeline;
pub mod response;
pub mod steps;

pub use pipeline::{ChatPipeline, IntentDecision};
pub use steps::{AgentStep, TurnRequest, TurnState};

/// Pull the JSON object out of a model reply that may be wrapped in code
/// fences or surrounded by prose. Falls back to the trimmed input so the
/// caller's parse error reports the real text.
pub(crate) fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let start = trimmed.find(|c| c == '{' || c == '[');
    let end = trimmed.rfind(|c| c == '}' || c == ']');
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &trimmed[s..=e],
        _ => trimmed,
    }
}
