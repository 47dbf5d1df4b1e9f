// src/chat/agent_loop.rs
// Bounded tool-calling loop: the model alternates JSON directives with tool
// observations until it declares a final answer or hits the iteration cap.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::extract_json;
use super::steps::TurnState;
use crate::error::PipelineError;
use crate::llm::ModelClient;
use crate::tools::ToolRegistry;

/// Observation text beyond this is elided from the working transcript.
const OBSERVATION_PROMPT_CAP: usize = 16_000;

const DIRECTIVE_PROTOCOL: &str = r#"
# Protocol
On every reply, return exactly one JSON object in one of these two forms and nothing else:
{"thought": "<your reasoning>", "action": {"tool": "<tool name>", "input": "<tool input text>"}}
{"thought": "<your reasoning>", "final_answer": "<your complete answer>"}
Use one tool per reply. Declare final_answer only when you have everything the answer needs."#;

/// One decoded model reply: either a tool action or the final answer.
#[derive(Debug, Deserialize)]
struct Directive {
    #[serde(default)]
    thought: Option<String>,
    #[serde(default)]
    action: Option<DirectiveAction>,
    #[serde(default)]
    final_answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectiveAction {
    tool: String,
    #[serde(default)]
    input: Value,
}

impl DirectiveAction {
    /// Tool inputs are textual; structured inputs pass through as JSON text.
    fn input_text(&self) -> String {
        match &self.input {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Anything outside the directive contract is a parse failure, never silent
/// data.
fn parse_directive(raw: &str) -> Result<Directive, String> {
    let directive: Directive = serde_json::from_str(extract_json(raw))
        .map_err(|e| format!("directive parse error: {}", e))?;

    match (&directive.action, &directive.final_answer) {
        (Some(_), Some(_)) => {
            Err("directive carries both an action and a final_answer; pick one".to_string())
        }
        (None, None) => {
            Err("directive carries neither an action nor a final_answer".to_string())
        }
        _ => Ok(directive),
    }
}

#[derive(Debug)]
pub struct LoopOutcome {
    /// The declared answer, or empty when the iteration cap was reached.
    pub final_text: String,
    /// Ordered thought/action/observation records for the step log.
    pub trace: Vec<String>,
}

pub struct AgentLoop<'a> {
    model: &'a dyn ModelClient,
    registry: &'a ToolRegistry,
    max_iterations: usize,
}

impl<'a> AgentLoop<'a> {
    pub fn new(model: &'a dyn ModelClient, registry: &'a ToolRegistry, max_iterations: usize) -> Self {
        Self { model, registry, max_iterations }
    }

    fn render_prompt(&self, goal: &str, transcript: &str) -> String {
        let mut prompt = format!(
            "{}\n\n# Tools\n{}\n{}",
            goal,
            self.registry.render(),
            DIRECTIVE_PROTOCOL
        );
        if !transcript.is_empty() {
            prompt.push_str("\n\n# Progress so far\n");
            prompt.push_str(transcript);
        }
        prompt.push_str("\n\nRespond with your next directive.");
        prompt
    }

    /// Run the loop against one goal. Tool failures come back to the model
    /// as observations; only tool faults and model transport errors abort.
    pub async fn run(&self, goal: &str, state: &mut TurnState) -> Result<LoopOutcome, PipelineError> {
        let mut trace = Vec::new();
        let mut transcript = String::new();

        for iteration in 0..self.max_iterations {
            let prompt = self.render_prompt(goal, &transcript);
            let completion = self.model.invoke(&prompt).await?;
            state.add_usage(&completion.usage);

            let directive = match parse_directive(&completion.text) {
                Ok(d) => d,
                Err(parse_error) => {
                    // One corrective re-prompt before the iteration counts
                    let corrective = format!(
                        "{}\n\nYour previous reply could not be used: {}\nReply again with a single JSON object in the required form.",
                        prompt, parse_error
                    );
                    let retry = self.model.invoke(&corrective).await?;
                    state.add_usage(&retry.usage);
                    match parse_directive(&retry.text) {
                        Ok(d) => d,
                        Err(e) => {
                            warn!(iteration, "directive still malformed after corrective re-prompt: {}", e);
                            trace.push(format!("[Invalid directive] {}", e));
                            transcript.push_str(&format!(
                                "\nObservation: your reply was not a valid directive ({}).\n",
                                e
                            ));
                            continue;
                        }
                    }
                }
            };

            if let Some(thought) = &directive.thought {
                trace.push(format!("[Thought] {}", thought));
                transcript.push_str(&format!("\nThought: {}\n", thought));
            }

            if let Some(answer) = directive.final_answer {
                info!(iteration, "loop declared final answer");
                trace.push(answer.clone());
                return Ok(LoopOutcome { final_text: answer, trace });
            }

            let Some(action) = directive.action else {
                // parse_directive guarantees one of the two branches
                continue;
            };

            let input = action.input_text();
            let observation = match self.registry.get(&action.tool) {
                Some(tool) => tool.call(&input).await?,
                None => format!(
                    "unknown tool '{}'; available tools: {}",
                    action.tool,
                    self.registry.names().join(", ")
                ),
            };

            trace.push(format!("[Action] {}: {}", action.tool, input));
            trace.push(format!("[Observation] {}", observation));

            let elided = if observation.len() > OBSERVATION_PROMPT_CAP {
                let head: String = observation.chars().take(OBSERVATION_PROMPT_CAP).collect();
                format!("{}...[truncated]", head)
            } else {
                observation
            };
            transcript.push_str(&format!(
                "Action: {}\nAction Input: {}\nObservation: {}\n",
                action.tool, input, elided
            ));
        }

        // Soft failure: the turn continues with whatever the trace holds
        warn!(max_iterations = self.max_iterations, "loop hit iteration cap without a final answer");
        Ok(LoopOutcome { final_text: String::new(), trace })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_action_directive() {
        let raw = r#"{"thought": "look up the column", "action": {"tool": "column_metadata_extractor",
            "input": "{\"query\": \"dentists\", \"datasource\": \"ahrf\"}"}}"#;
        let directive = parse_directive(raw).unwrap();
        let action = directive.action.unwrap();
        assert_eq!(action.tool, "column_metadata_extractor");
        assert!(action.input_text().contains("dentists"));
    }

    #[test]
    fn structured_action_input_becomes_json_text() {
        let raw = r#"{"action": {"tool": "fetch_record", "input": {"query": "SELECT 1"}}}"#;
        let directive = parse_directive(raw).unwrap();
        assert_eq!(directive.action.unwrap().input_text(), r#"{"query":"SELECT 1"}"#);
    }

    #[test]
    fn parses_a_final_answer_with_fences() {
        let raw = "```json\n{\"thought\": \"done\", \"final_answer\": \"There are 17,060 dentists.\"}\n```";
        let directive = parse_directive(raw).unwrap();
        assert_eq!(directive.final_answer.as_deref(), Some("There are 17,060 dentists."));
    }

    #[test]
    fn rejects_ambiguous_and_empty_directives() {
        let both = r#"{"action": {"tool": "t", "input": ""}, "final_answer": "x"}"#;
        assert!(parse_directive(both).is_err());

        let neither = r#"{"thought": "hmm"}"#;
        assert!(parse_directive(neither).is_err());

        assert!(parse_directive("not json at all").is_err());
    }
}
