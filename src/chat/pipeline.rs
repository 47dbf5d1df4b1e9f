// src/chat/pipeline.rs
// Per-turn state machine. Drives one turn end-to-end and yields output
// chunks to the caller as they become available; the caller's consumption
// paces everything downstream of a yield.

use async_stream::stream;
use futures::Stream;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::agent_loop::AgentLoop;
use super::extract_json;
use super::ledger::{assemble_record, RateCard};
use super::response::{format_instructions, FinalResponse, ResponseValidator};
use super::steps::{AgentStep, TurnRequest, TurnState};
use crate::datasource::profile;
use crate::datasource::prompts::{self, fill};
use crate::error::PipelineError;
use crate::llm::{ModelClient, StreamEvent, TokenUsage};
use crate::store::{InsertOutcome, PriorTurn, SessionRecord, SessionStore, TurnRecord, TurnStore};
use crate::tools::ToolRegistry;

/// The intent classifier's decision for one turn.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentDecision {
    #[serde(default)]
    pub context_required: bool,
    #[serde(rename = "chatId", default)]
    pub chat_ids: Vec<i64>,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub run_downstream_llm: bool,
    #[serde(default)]
    pub rephrased_query: String,
}

#[derive(Debug, Deserialize)]
struct YearScope {
    #[serde(default)]
    year_scope: String,
    #[serde(default)]
    years: Vec<i32>,
}

#[derive(Debug, Deserialize)]
struct DenominatorNeed {
    #[serde(default)]
    denominator_required: bool,
}

/// Tool subsets wired into the retrieval loops.
pub struct ToolSuite {
    /// SQL execution (the query-generation loop)
    pub query: ToolRegistry,
    /// Catalog/document search (column retrieval and research loops)
    pub metadata: ToolRegistry,
    /// Survey mapping files (the hierarchy-mapping loop)
    pub mapping: ToolRegistry,
}

pub struct PipelineSettings {
    pub rates: RateCard,
    pub history_turn_cap: usize,
    pub loop_max_iterations: usize,
    pub repair_max_attempts: usize,
    pub mapping_dir: PathBuf,
}

pub struct ChatPipeline {
    model: Arc<dyn ModelClient>,
    turns: Arc<dyn TurnStore>,
    sessions: Arc<dyn SessionStore>,
    tools: ToolSuite,
    settings: PipelineSettings,
}

impl ChatPipeline {
    pub fn new(
        model: Arc<dyn ModelClient>,
        turns: Arc<dyn TurnStore>,
        sessions: Arc<dyn SessionStore>,
        tools: ToolSuite,
        settings: PipelineSettings,
    ) -> Self {
        Self { model, turns, sessions, tools, settings }
    }

    /// Run one turn. The returned stream yields UTF-8 chunks: an empty
    /// handshake, free text for display, and finally the serialized turn
    /// record. The stream never ends with a raw error; failures degrade to
    /// one canned message and the turn is persisted regardless.
    pub fn run_turn(self: Arc<Self>, request: TurnRequest) -> impl Stream<Item = String> + Send + 'static {
        stream! {
            yield String::new();

            let mut state = TurnState::new(&request.prompt);

            let (chat_id, prior) = match self.prepare_turn(&request, &state).await {
                Ok(v) => v,
                Err(e) => {
                    yield self.fail_turn(&request, &mut state, 1, &e).await;
                    return;
                }
            };

            let decision = match self.classify_intent(&request, &prior, &mut state).await {
                Ok(d) => d,
                Err(e) => {
                    yield self.fail_turn(&request, &mut state, chat_id, &e).await;
                    return;
                }
            };

            let mut search_plan = String::new();

            if !decision.run_downstream_llm && !decision.response.is_empty() {
                // Trivial turn: the classifier's reply is the whole stream
                state.streamed.push_str(&decision.response);
                yield decision.response.clone();
                state.push_step(AgentStep::DirectReply(decision.response.clone()));
                for turn in &prior {
                    if decision.chat_ids.contains(&turn.chat_id) {
                        if let Ok(doc) = serde_json::to_value(turn) {
                            state.push_step(AgentStep::PriorTurn(doc));
                        }
                    }
                }
            } else if request.data_source.is_research() {
                let answer = match self.run_research_retrieval(&request, &decision, &prior, &mut state).await {
                    Ok((plan, answer)) => {
                        search_plan = plan;
                        answer
                    }
                    Err(e) => {
                        yield self.fail_turn(&request, &mut state, chat_id, &e).await;
                        return;
                    }
                };
                state.streamed.push_str(&answer);
                yield answer;
            } else {
                let mut rx = match self.run_structured_retrieval(&request, &decision, &prior, &mut state).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        yield self.fail_turn(&request, &mut state, chat_id, &e).await;
                        return;
                    }
                };

                // The free-text answer streams through token by token
                let mut stream_failure: Option<PipelineError> = None;
                while let Some(event) = rx.recv().await {
                    match event {
                        StreamEvent::TextDelta(delta) => {
                            state.streamed.push_str(&delta);
                            yield delta;
                        }
                        StreamEvent::Usage(usage) => state.add_usage(&usage),
                        StreamEvent::Error(detail) => {
                            stream_failure = Some(PipelineError::from_model_failure(None, detail));
                            break;
                        }
                        StreamEvent::Done => break,
                    }
                }
                if let Some(e) = stream_failure {
                    yield self.fail_turn(&request, &mut state, chat_id, &e).await;
                    return;
                }
            }

            let summary = match self.summarize(&request, &search_plan, &mut state).await {
                Ok(summary) => summary,
                Err(e) => {
                    yield self.fail_turn(&request, &mut state, chat_id, &e).await;
                    return;
                }
            };

            let record = self.persist_turn(&request, &state, chat_id, summary).await;
            info!(
                session_id = %request.session_id,
                datasource = request.data_source.as_str(),
                chat_id,
                input_tokens = state.usage.input_tokens,
                output_tokens = state.usage.output_tokens,
                "turn complete"
            );

            if let Ok(serialized) = serde_json::to_string(&record) {
                yield serialized;
            }
        }
    }

    /// Assign the turn index, load prior context, then hold the identity
    /// with a placeholder record.
    async fn prepare_turn(
        &self,
        request: &TurnRequest,
        state: &TurnState,
    ) -> Result<(i64, Vec<PriorTurn>), PipelineError> {
        let chat_id = self
            .turns
            .latest_chat_id(&request.user_id, &request.session_id)
            .await?
            .map(|id| id + 1)
            .unwrap_or(1);

        let prior = self
            .turns
            .recent_turns(&request.user_id, &request.session_id, self.settings.history_turn_cap)
            .await?;

        let placeholder = assemble_record(
            FinalResponse::empty(),
            request,
            state,
            chat_id,
            self.model.model_name(),
            &self.settings.rates,
        );
        match self.turns.insert(&placeholder).await {
            Ok(InsertOutcome::Conflict) => {
                self.turns.update(&placeholder.id, &placeholder).await?;
            }
            Ok(InsertOutcome::Inserted) => {}
            Err(e) => warn!(session_id = %request.session_id, "placeholder insert failed: {}", e),
        }

        Ok((chat_id, prior))
    }

    async fn classify_intent(
        &self,
        request: &TurnRequest,
        prior: &[PriorTurn],
        state: &mut TurnState,
    ) -> Result<IntentDecision, PipelineError> {
        let start = Instant::now();
        let chat_history = serde_json::to_string(prior).unwrap_or_else(|_| "[]".into());
        let template = if request.data_source.is_research() {
            prompts::RESEARCH_INTENT_CLASSIFIER
        } else {
            prompts::INTENT_CLASSIFIER
        };
        let prompt = fill(template, &[
            ("user_question", &request.prompt),
            ("chat_history", &chat_history),
        ]);

        let completion = self.model.invoke(&prompt).await?;
        state.add_usage(&completion.usage);
        info!(
            session_id = %request.session_id,
            datasource = request.data_source.as_str(),
            stage = "intent",
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "intent classified"
        );

        serde_json::from_str(extract_json(&completion.text))
            .map_err(|e| PipelineError::MalformedOutput(format!("intent decision: {}", e)))
    }

    /// Document branch: plan the search, then one retrieval loop whose final
    /// text is the user-visible answer.
    async fn run_research_retrieval(
        &self,
        request: &TurnRequest,
        decision: &IntentDecision,
        prior: &[PriorTurn],
        state: &mut TurnState,
    ) -> Result<(String, String), PipelineError> {
        let start = Instant::now();
        let context = referenced_turns(prior, &decision.chat_ids);
        let chat_history = serde_json::to_string(&context).unwrap_or_else(|_| "[]".into());

        let plan_prompt = fill(prompts::RESEARCH_DECISION, &[("user_question", &request.prompt)]);
        let plan = self.model.invoke(&plan_prompt).await?;
        state.add_usage(&plan.usage);

        let rephrased = format!(
            "Original Question: {} rephrased prompt: {}",
            request.prompt, decision.rephrased_query
        );
        let goal = fill(prompts::RESEARCH_RETRIEVER, &[
            ("user_question", &request.prompt),
            ("original_rephrased_question", &rephrased),
            ("decision_response", &plan.text),
            ("chat_history", &chat_history),
        ]);

        let agent = AgentLoop::new(
            self.model.as_ref(),
            &self.tools.metadata,
            self.settings.loop_max_iterations,
        );
        let outcome = agent.run(&goal, state).await?;
        state.push_step(AgentStep::LoopTrace {
            label: "research_agent",
            entries: outcome.trace,
        });

        info!(
            session_id = %request.session_id,
            datasource = request.data_source.as_str(),
            stage = "research_retrieval",
            elapsed_ms = start.elapsed().as_millis() as u64,
            "research retrieval complete"
        );

        Ok((plan.text, outcome.final_text))
    }

    /// Structured-source branch: rephrase, the optional survey stages, the
    /// column and query loops, then the streamed free-text answer.
    async fn run_structured_retrieval(
        &self,
        request: &TurnRequest,
        decision: &IntentDecision,
        prior: &[PriorTurn],
        state: &mut TurnState,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamEvent>, PipelineError> {
        let source_profile = profile(request.data_source);
        let context = referenced_turns(prior, &decision.chat_ids);
        let chat_history = serde_json::to_string(&context).unwrap_or_else(|_| "[]".into());

        // Rephrase
        let start = Instant::now();
        let rephraser_input = if decision.rephrased_query.is_empty() {
            request.prompt.as_str()
        } else {
            decision.rephrased_query.as_str()
        };
        let prompt = fill(prompts::USER_PROMPT_REPHRASER, &[
            ("datasource_specific_instructions", source_profile.rephrase_instructions),
            ("user_question", rephraser_input),
            ("chat_history", &chat_history),
        ]);
        let completion = self.model.invoke(&prompt).await?;
        state.add_usage(&completion.usage);
        state.rephrased_query = completion.text.trim().to_string();
        state.push_step(AgentStep::Rephrase {
            rephrased_queries: state.rephrased_query.clone(),
        });
        info!(
            session_id = %request.session_id,
            datasource = request.data_source.as_str(),
            stage = "rephrase",
            elapsed_ms = start.elapsed().as_millis() as u64,
            "user prompt rephrased"
        );

        let mut column_instructions = source_profile.column_instructions.to_string();
        if source_profile.needs_denominator_stages {
            column_instructions = self
                .run_denominator_stages(request, state, column_instructions)
                .await?;
        }

        let question = format!(
            "Original Question: {} Rephrased Query: {} Datasource {}",
            request.prompt,
            state.rephrased_query,
            request.data_source.as_str()
        );

        // Loop 1: locate relevant columns
        let start = Instant::now();
        let goal = fill(prompts::COLUMN_RETRIEVER, &[
            ("question", &question),
            ("data_source_specific_instruction", &column_instructions),
            ("chat_history", &chat_history),
        ]);
        let agent = AgentLoop::new(
            self.model.as_ref(),
            &self.tools.metadata,
            self.settings.loop_max_iterations,
        );
        let columns = agent.run(&goal, state).await?;
        let relevant_columns = columns.final_text.clone();
        state.push_step(AgentStep::LoopTrace {
            label: "ai_search_agent",
            entries: columns.trace,
        });
        info!(
            session_id = %request.session_id,
            datasource = request.data_source.as_str(),
            stage = "column_retrieval",
            elapsed_ms = start.elapsed().as_millis() as u64,
            "column retrieval complete"
        );

        // Loop 2: execute queries and gather results
        let start = Instant::now();
        let goal = fill(prompts::QUERY_GENERATOR, &[
            ("datasource_specific_instructions", source_profile.query_instructions),
            ("question", &question),
            ("parsed_relevant_columns", &relevant_columns),
            ("chat_history", &chat_history),
        ]);
        let agent = AgentLoop::new(
            self.model.as_ref(),
            &self.tools.query,
            self.settings.loop_max_iterations,
        );
        let gathered = agent.run(&goal, state).await?;
        state.push_step(AgentStep::LoopTrace {
            label: "sql_agent_steps",
            entries: gathered.trace,
        });
        info!(
            session_id = %request.session_id,
            datasource = request.data_source.as_str(),
            stage = "query_generation",
            elapsed_ms = start.elapsed().as_millis() as u64,
            "query loop complete"
        );

        // Final free-text answer, streamed token by token to the caller
        let prompt = fill(prompts::RESPONSE_GENERATOR, &[("agent_outputs", &state.render_steps())]);
        self.model.stream(&prompt).await
    }

    /// Year-scope and denominator classifiers, plus the mapping loop when
    /// the question needs a denominator. Returns the augmented column
    /// instructions.
    async fn run_denominator_stages(
        &self,
        request: &TurnRequest,
        state: &mut TurnState,
        mut column_instructions: String,
    ) -> Result<String, PipelineError> {
        let prompt = fill(prompts::YEAR_SCOPE_CLASSIFIER, &[("user_question", &state.rephrased_query)]);
        let completion = self.model.invoke(&prompt).await?;
        state.add_usage(&completion.usage);
        let mut scope: YearScope = serde_json::from_str(extract_json(&completion.text))
            .map_err(|e| PipelineError::MalformedOutput(format!("year-scope classifier: {}", e)))?;

        if scope.year_scope == "unknown" || scope.years.is_empty() {
            if let Some((latest, _)) = crate::tools::mapping::latest_mapping_year(&self.settings.mapping_dir) {
                scope.years = vec![latest];
            }
        }

        let prompt = fill(prompts::DENOMINATOR_CLASSIFIER, &[("user_question", &state.rephrased_query)]);
        let completion = self.model.invoke(&prompt).await?;
        state.add_usage(&completion.usage);
        let need: DenominatorNeed = serde_json::from_str(extract_json(&completion.text))
            .map_err(|e| PipelineError::MalformedOutput(format!("denominator classifier: {}", e)))?;

        info!(
            session_id = %request.session_id,
            datasource = request.data_source.as_str(),
            stage = "survey_classifiers",
            years = ?scope.years,
            denominator_required = need.denominator_required,
            "survey classifiers complete"
        );

        let years = format!("{:?}", scope.years);
        column_instructions.push_str(&fill(prompts::YEAR_SCOPE_SUFFIX, &[("years", &years)]));

        if need.denominator_required {
            let question = format!(
                "Original Question: {} Rephrased Query: {} Datasource {} Years requested {:?}",
                request.prompt,
                state.rephrased_query,
                request.data_source.as_str(),
                scope.years
            );
            let goal = fill(prompts::HIERARCHY_MAPPING, &[("question", &question)]);
            let agent = AgentLoop::new(
                self.model.as_ref(),
                &self.tools.mapping,
                self.settings.loop_max_iterations,
            );
            let mapping = agent.run(&goal, state).await?;
            column_instructions.push_str(&fill(prompts::DENOMINATOR_SUFFIX, &[
                ("mapping_logic", &mapping.final_text),
            ]));
        }

        Ok(column_instructions)
    }

    /// Exactly one validator invocation per turn, on the full step log.
    async fn summarize(
        &self,
        request: &TurnRequest,
        search_plan: &str,
        state: &mut TurnState,
    ) -> Result<FinalResponse, PipelineError> {
        let start = Instant::now();
        let source_profile = profile(request.data_source);
        let agent_outputs = state.render_steps();

        let prompt = if request.data_source.is_research() {
            fill(prompts::RESEARCH_STRUCTURED_RESPONSE_GENERATOR, &[
                ("agent_outputs", &agent_outputs),
                ("response_format_instructions", format_instructions(request.data_source)),
                ("decision_response", search_plan),
            ])
        } else {
            fill(prompts::STRUCTURED_RESPONSE_GENERATOR, &[
                ("agent_outputs", &agent_outputs),
                ("response_format_instructions", format_instructions(request.data_source)),
                ("datasource_specific_user_prompts", source_profile.followup_examples),
                ("user_question", &request.prompt),
            ])
        };

        let completion = self.model.invoke(&prompt).await?;
        state.add_usage(&completion.usage);

        let validator = ResponseValidator::new(self.model.as_ref(), self.settings.repair_max_attempts);
        let mut repair_usage = TokenUsage::default();
        let summary = validator
            .validate(&completion.text, request.data_source, &mut repair_usage)
            .await;
        state.add_usage(&repair_usage);

        info!(
            session_id = %request.session_id,
            datasource = request.data_source.as_str(),
            stage = "summarize",
            elapsed_ms = start.elapsed().as_millis() as u64,
            "structured response generated"
        );

        Ok(summary)
    }

    /// Write the ledger record (insert, or update on an existing identity)
    /// and bump the session's last-activity timestamp. Persistence problems
    /// are logged, never fatal to the stream.
    async fn persist_turn(
        &self,
        request: &TurnRequest,
        state: &TurnState,
        chat_id: i64,
        summary: FinalResponse,
    ) -> TurnRecord {
        let record = assemble_record(
            summary,
            request,
            state,
            chat_id,
            self.model.model_name(),
            &self.settings.rates,
        );

        match self.turns.insert(&record).await {
            Ok(InsertOutcome::Conflict) => {
                if let Err(e) = self.turns.update(&record.id, &record).await {
                    error!(session_id = %request.session_id, "failed at insertion/update of record: {}", e);
                }
            }
            Ok(InsertOutcome::Inserted) => {}
            Err(e) => {
                error!(session_id = %request.session_id, "failed at insertion/update of record: {}", e);
            }
        }

        let session_key = SessionRecord::identity(&request.user_id, &request.session_id);
        match self.sessions.get(&session_key).await {
            Ok(Some(mut session)) => {
                session.last_updated_at = chrono::Utc::now().to_rfc3339();
                if let Err(e) = self.sessions.update(&session_key, &session).await {
                    warn!(session_id = %request.session_id, "session timestamp update failed: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(session_id = %request.session_id, "session lookup failed: {}", e),
        }

        record
    }

    /// Convert any stage failure into the one user-visible message, persist
    /// what the turn has, and end the stream.
    async fn fail_turn(
        &self,
        request: &TurnRequest,
        state: &mut TurnState,
        chat_id: i64,
        err: &PipelineError,
    ) -> String {
        error!(
            session_id = %request.session_id,
            datasource = request.data_source.as_str(),
            "error occurred while generating assistant response: {}",
            err
        );

        let message = err.user_message().to_string();
        state.streamed.push_str(&message);
        let _ = self
            .persist_turn(request, state, chat_id, FinalResponse::empty())
            .await;
        message
    }
}

/// The prior turns the intent classifier referenced by chat id.
fn referenced_turns(prior: &[PriorTurn], chat_ids: &[i64]) -> Vec<PriorTurn> {
    prior
        .iter()
        .filter(|turn| chat_ids.contains(&turn.chat_id))
        .cloned()
        .collect()
}
