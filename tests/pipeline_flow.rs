// tests/pipeline_flow.rs
// End-to-end turns through the pipeline with a scripted model and an
// in-memory store.

mod test_helpers;

use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;

use dex::chat::TurnRequest;
use dex::datasource::DataSource;
use dex::error::{RATE_LIMIT_MESSAGE, RETRY_LATER_MESSAGE};
use dex::store::TurnStore;

use test_helpers::{
    action_directive, build_pipeline, final_answer_directive, intent_downstream,
    intent_short_circuit, text, ScriptedModel, ScriptedReply, EMPTY_SUMMARY,
};

async fn run_to_chunks(
    pipeline: Arc<dex::chat::ChatPipeline>,
    request: TurnRequest,
) -> Vec<String> {
    pipeline.run_turn(request).collect().await
}

fn last_record(chunks: &[String]) -> Value {
    serde_json::from_str(chunks.last().expect("stream yielded nothing"))
        .expect("final chunk is not a record")
}

#[tokio::test]
async fn greeting_short_circuits_the_pipeline() {
    let model = Arc::new(ScriptedModel::new(vec![
        intent_short_circuit("Hello, how can I assist you?"),
        text(EMPTY_SUMMARY),
    ]));
    let (pipeline, store) = build_pipeline(model.clone()).await;

    let request = TurnRequest::new("s1", "ada@example.org", DataSource::Ahrf, "hi");
    let chunks = run_to_chunks(pipeline, request).await;

    // Handshake, the classifier's reply verbatim, then the record
    assert_eq!(chunks[0], "");
    assert_eq!(chunks[1], "Hello, how can I assist you?");
    assert_eq!(chunks.len(), 3);

    let record = last_record(&chunks);
    assert_eq!(record["sqlCode"], "");
    assert!(record["visualization"].is_null());
    assert_eq!(record["followups"].as_array().unwrap().len(), 0);
    assert_eq!(record["viewVisualization"], false);

    let stored = store.get_turn("ada@example.org", "s1", 1).await.unwrap().unwrap();
    assert_eq!(stored.response, "Hello, how can I assist you?");
    assert_eq!(stored.chat_id, 1);
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn structured_turn_streams_the_answer_and_persists_costs() {
    let model = Arc::new(ScriptedModel::new(vec![
        intent_downstream("How many dentists practice in Texas?"),
        text("How many dentists practice in Texas?"),
        // column loop: one tool call, then the answer
        action_directive(
            "column_metadata_extractor",
            r#"{\"query\": \"dentists\", \"datasource\": \"ahrf\"}"#,
        ),
        final_answer_directive("sem_ahrf_state_national_survey.dent for state_code TX"),
        // query loop: one tool call, then the answer
        action_directive("fetch_record", "SELECT dent FROM sem_ahrf_state_national_survey"),
        final_answer_directive("17,060 dentists in 2022"),
        // streamed free-text answer
        text("There are 17,060 dentists practicing in Texas as of 2022."),
        // structured summary
        text(
            r#"{"sqlCode": "SELECT dent FROM sem_ahrf_state_national_survey WHERE state_code='TX'",
                "visualization": null,
                "followups": [{"type": "sql", "label": "Break the count down by year"}],
                "viewVisualization": false}"#,
        ),
    ]));
    let (pipeline, store) = build_pipeline(model.clone()).await;

    let request = TurnRequest::new("s1", "ada@example.org", DataSource::Ahrf, "how many dentists in texas?");
    let chunks = run_to_chunks(pipeline, request).await;

    assert_eq!(chunks[0], "");
    let streamed: String = chunks[1..chunks.len() - 1].concat();
    assert_eq!(streamed, "There are 17,060 dentists practicing in Texas as of 2022.");

    let record = last_record(&chunks);
    assert!(record["sqlCode"].as_str().unwrap().contains("SELECT dent"));
    assert_eq!(record["rephrasedPrompt"], "How many dentists practice in Texas?");
    assert_eq!(record["response"], "There are 17,060 dentists practicing in Texas as of 2022.");

    // 7 invokes + 1 streamed call, each 100 in / 10 out
    assert_eq!(record["total_input_tokens"], 800);
    assert_eq!(record["total_output_tokens"], 80);
    let input_cost = record["input_cost"].as_f64().unwrap();
    let output_cost = record["output_cost"].as_f64().unwrap();
    let total_cost = record["total_cost"].as_f64().unwrap();
    assert!((input_cost - 800.0 * 2.50 / 1_000_000.0).abs() < 1e-12);
    assert!((output_cost - 80.0 * 10.00 / 1_000_000.0).abs() < 1e-12);
    assert!((total_cost - (input_cost + output_cost)).abs() < 1e-12);

    let stored = store.get_turn("ada@example.org", "s1", 1).await.unwrap().unwrap();
    assert_eq!(stored.summary.followups.len(), 1);
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn research_turn_emits_the_loop_answer() {
    let model = Arc::new(ScriptedModel::new(vec![
        intent_downstream("What conditions are linked to poor oral health?"),
        text("Read the top documents on systemic conditions."),
        action_directive(
            "column_metadata_extractor",
            r#"{\"query\": \"systemic conditions\", \"datasource\": \"research\"}"#,
        ),
        final_answer_directive("Diabetes and cardiovascular disease are the most cited links."),
        text(r#"{"followups": [{"type": "general", "label": "Which journals publish these studies?"}]}"#),
    ]));
    let (pipeline, store) = build_pipeline(model.clone()).await;

    let request = TurnRequest::new(
        "r1",
        "ada@example.org",
        DataSource::Research,
        "what conditions are linked to poor oral health?",
    );
    let chunks = run_to_chunks(pipeline, request).await;

    assert_eq!(chunks[1], "Diabetes and cardiovascular disease are the most cited links.");

    // Research summaries never carry SQL or chart fields
    let record = last_record(&chunks);
    assert_eq!(record["sqlCode"], "");
    assert!(record["visualization"].is_null());
    assert_eq!(record["viewVisualization"], false);
    assert_eq!(record["applicationName"], "AI Research Explorer");
    assert_eq!(record["followups"].as_array().unwrap().len(), 1);

    let stored = store.get_turn("ada@example.org", "r1", 1).await.unwrap().unwrap();
    assert_eq!(stored.summary.sql_code, "");
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn survey_turn_runs_the_classifier_stages_in_order() {
    let model = Arc::new(ScriptedModel::new(vec![
        intent_downstream("What share of adults lost all teeth in 2024?"),
        text("What share of adults lost all their teeth in 2024?"),
        // year-scope then denominator classifiers
        text(r#"{"year_scope": "single", "years": [2024]}"#),
        text(r#"{"denominator_required": true}"#),
        // mapping loop
        action_directive("sohea_mapping_file_reader", "{}"),
        final_answer_directive("Numerator Q5 level 3; denominator parent Q1 all levels."),
        // column and query loops
        final_answer_directive("sem_sohea_survey: question_variable, weight_group, response_value"),
        final_answer_directive("4.2 percent weighted"),
        text("About 4.2 percent of adults reported losing all their teeth in 2024."),
        text(EMPTY_SUMMARY),
    ]));
    let (pipeline, _store) = build_pipeline(model.clone()).await;

    let request = TurnRequest::new(
        "s2",
        "ada@example.org",
        DataSource::Sohea,
        "what share of adults lost all teeth in 2024?",
    );
    let chunks = run_to_chunks(pipeline, request).await;

    let streamed: String = chunks[1..chunks.len() - 1].concat();
    assert!(streamed.contains("4.2 percent"));
    // Every scripted stage was consumed in order
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn repair_loop_adopts_the_second_attempt() {
    let model = Arc::new(ScriptedModel::new(vec![
        intent_short_circuit("Hello!"),
        text("this is { not valid json"),
        text(
            r#"{"sqlCode": "", "visualization": null,
                "followups": [{"type": "general", "label": "Ask about county data"}],
                "viewVisualization": false}"#,
        ),
    ]));
    let (pipeline, store) = build_pipeline(model.clone()).await;

    let request = TurnRequest::new("s1", "ada@example.org", DataSource::Hpsa, "hello");
    let chunks = run_to_chunks(pipeline, request).await;

    let record = last_record(&chunks);
    assert_eq!(record["followups"].as_array().unwrap().len(), 1);
    assert_eq!(record["followups"][0]["label"], "Ask about county data");

    let stored = store.get_turn("ada@example.org", "s1", 1).await.unwrap().unwrap();
    assert_eq!(stored.summary.followups.len(), 1);
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn exhausted_repairs_persist_the_safe_default() {
    let mut replies = vec![intent_short_circuit("Hello!"), text("{ broken")];
    // Exactly five repair attempts, all failing
    for _ in 0..5 {
        replies.push(text("{ still broken"));
    }
    let model = Arc::new(ScriptedModel::new(replies));
    let (pipeline, store) = build_pipeline(model.clone()).await;

    let request = TurnRequest::new("s1", "ada@example.org", DataSource::Merative, "hello");
    let chunks = run_to_chunks(pipeline, request).await;

    let record = last_record(&chunks);
    assert_eq!(record["sqlCode"], "");
    assert!(record["visualization"].is_null());
    assert_eq!(record["followups"].as_array().unwrap().len(), 0);
    assert_eq!(record["viewVisualization"], false);

    // The script covered intent + structured output + exactly 5 repairs;
    // a sixth repair attempt would have errored the turn instead
    assert_eq!(model.remaining(), 0);
    let stored = store.get_turn("ada@example.org", "s1", 1).await.unwrap().unwrap();
    assert_eq!(stored.summary.sql_code, "");
}

#[tokio::test]
async fn chart_with_mismatched_series_is_repaired_or_dropped() {
    let model = Arc::new(ScriptedModel::new(vec![
        intent_short_circuit("Here is the chart again."),
        // x has two labels, y has one value: schema violation
        text(
            r#"{"sqlCode": "", "visualization": {"type": "bar", "x": ["CA", "TX"], "y": [31214],
                "title": "Dentists"}, "followups": [], "viewVisualization": true}"#,
        ),
        // repaired on the first attempt
        text(
            r#"{"sqlCode": "", "visualization": {"type": "bar", "x": ["CA", "TX"], "y": [31214, 17060],
                "title": "Dentists"}, "followups": [], "viewVisualization": true}"#,
        ),
    ]));
    let (pipeline, store) = build_pipeline(model.clone()).await;

    let request = TurnRequest::new("s1", "ada@example.org", DataSource::Ahrf, "chart please");
    let chunks = run_to_chunks(pipeline, request).await;

    let record = last_record(&chunks);
    let chart = &record["visualization"];
    assert_eq!(chart["x"].as_array().unwrap().len(), chart["y"].as_array().unwrap().len());

    let stored = store.get_turn("ada@example.org", "s1", 1).await.unwrap().unwrap();
    let chart = stored.summary.visualization.expect("chart survived repair");
    assert_eq!(chart.x.len(), 2);
}

#[tokio::test]
async fn loop_iteration_cap_is_a_soft_failure() {
    // The model never declares a final answer: every reply is another tool
    // call. Both retrieval loops hit the cap; the turn still summarizes.
    let looping_directive =
        r#"{"thought": "keep looking", "action": {"tool": "column_metadata_extractor", "input": "{}"}}"#;
    let model = Arc::new(
        ScriptedModel::new(vec![
            intent_downstream("loop forever"),
            text("loop forever"),
        ])
        .with_fallback(looping_directive),
    );
    let (pipeline, store) = build_pipeline(model.clone()).await;

    let request = TurnRequest::new("s1", "ada@example.org", DataSource::Ahrf, "loop");
    let chunks = run_to_chunks(pipeline, request).await;

    // The stream terminated normally and the turn was persisted
    let stored = store.get_turn("ada@example.org", "s1", 1).await.unwrap();
    assert!(stored.is_some());
    assert!(!chunks.is_empty());
}

#[tokio::test]
async fn rate_limited_intent_degrades_to_the_canned_message() {
    let model = Arc::new(ScriptedModel::new(vec![ScriptedReply::RateLimited]));
    let (pipeline, store) = build_pipeline(model).await;

    let request = TurnRequest::new("s1", "ada@example.org", DataSource::Ahrf, "hi");
    let chunks = run_to_chunks(pipeline, request).await;

    assert_eq!(chunks, vec![String::new(), RATE_LIMIT_MESSAGE.to_string()]);

    // The turn was still persisted, with the message as its response
    let stored = store.get_turn("ada@example.org", "s1", 1).await.unwrap().unwrap();
    assert_eq!(stored.response, RATE_LIMIT_MESSAGE);
    assert_eq!(stored.summary.sql_code, "");
}

#[tokio::test]
async fn generic_failures_use_the_retry_message() {
    let model = Arc::new(ScriptedModel::new(vec![ScriptedReply::Error(
        "connection reset by peer".into(),
    )]));
    let (pipeline, _store) = build_pipeline(model).await;

    let request = TurnRequest::new("s1", "ada@example.org", DataSource::Ahrf, "hi");
    let chunks = run_to_chunks(pipeline, request).await;

    assert_eq!(chunks[1], RETRY_LATER_MESSAGE);
}

#[tokio::test]
async fn turn_indices_increase_without_gaps() {
    let model = Arc::new(ScriptedModel::new(vec![
        intent_short_circuit("First reply."),
        text(EMPTY_SUMMARY),
        intent_short_circuit("Second reply."),
        text(EMPTY_SUMMARY),
        intent_short_circuit("Third reply."),
        text(EMPTY_SUMMARY),
    ]));
    let (pipeline, store) = build_pipeline(model).await;

    for expected in 1..=3i64 {
        let request = TurnRequest::new("s1", "ada@example.org", DataSource::Ahrf, "hi");
        let chunks = run_to_chunks(pipeline.clone(), request).await;
        let record = last_record(&chunks);
        assert_eq!(record["chatId"], expected);
        assert_eq!(record["id"], format!("s1-{}", expected));
    }

    assert_eq!(store.latest_chat_id("ada@example.org", "s1").await.unwrap(), Some(3));
    let history = store.session_history("ada@example.org", "s1").await.unwrap();
    let ids: Vec<i64> = history.iter().map(|r| r.chat_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn prior_turns_feed_the_next_turn_context() {
    let model = Arc::new(ScriptedModel::new(vec![
        intent_short_circuit("The count was 17,060."),
        text(EMPTY_SUMMARY),
    ]));
    let (pipeline, store) = build_pipeline(model).await;

    // Seed an earlier turn directly
    let earlier = {
        let request = TurnRequest::new("s1", "ada@example.org", DataSource::Ahrf, "how many dentists?");
        let state = dex::chat::TurnState::new(&request.prompt);
        dex::chat::ledger::assemble_record(
            dex::chat::response::FinalResponse::empty(),
            &request,
            &state,
            1,
            "scripted-model",
            &test_helpers::test_rates(),
        )
    };
    store.insert(&earlier).await.unwrap();

    let request = TurnRequest::new("s1", "ada@example.org", DataSource::Ahrf, "what was that count?");
    let chunks = run_to_chunks(pipeline, request).await;

    let record = last_record(&chunks);
    assert_eq!(record["chatId"], 2);

    let recent = store.recent_turns("ada@example.org", "s1", 5).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].chat_id, 2);
    assert_eq!(recent[1].chat_id, 1);
}
