// src/chat/ledger.rs
// Usage/cost accounting and assembly of the persisted turn record

use super::response::FinalResponse;
use super::steps::{TurnRequest, TurnState};
use crate::llm::TokenUsage;
use crate::store::TurnRecord;

/// Dollar rates per million tokens for the configured model.
#[derive(Debug, Clone, Copy)]
pub struct RateCard {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

/// Deterministic cost of a turn's accumulated token counts.
pub fn compute_cost(usage: &TokenUsage, rates: &RateCard) -> CostBreakdown {
    let input_cost = usage.input_tokens as f64 * rates.input_per_million / 1_000_000.0;
    let output_cost = usage.output_tokens as f64 * rates.output_per_million / 1_000_000.0;
    CostBreakdown {
        input_cost,
        output_cost,
        total_cost: input_cost + output_cost,
    }
}

/// Merge the validated summary with the turn metadata into the record that
/// gets persisted. Pure function of its inputs.
pub fn assemble_record(
    summary: FinalResponse,
    request: &TurnRequest,
    state: &TurnState,
    chat_id: i64,
    model_name: &str,
    rates: &RateCard,
) -> TurnRecord {
    let cost = compute_cost(&state.usage, rates);
    let show_visualization = summary.view_visualization;

    TurnRecord {
        summary,
        chat_id,
        id: TurnRecord::identity(&request.session_id, chat_id),
        inserted_at: chrono::Utc::now().to_rfc3339(),
        user_id: request.user_id.clone(),
        session_id: request.session_id.clone(),
        show_sql: false,
        show_visualization,
        prompt: request.prompt.clone(),
        rephrased_prompt: state.rephrased_query.clone(),
        response: state.streamed.clone(),
        total_input_tokens: state.usage.input_tokens,
        total_output_tokens: state.usage.output_tokens,
        modelname: model_name.to_string(),
        input_cost: cost.input_cost,
        output_cost: cost.output_cost,
        total_cost: cost.total_cost,
        data_source: request.data_source.as_str().to_string(),
        application_name: request.data_source.application_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::DataSource;

    #[test]
    fn cost_is_linear_in_tokens() {
        let rates = RateCard { input_per_million: 2.50, output_per_million: 10.00 };
        let cost = compute_cost(&TokenUsage::new(1_000_000, 100_000), &rates);
        assert!((cost.input_cost - 2.50).abs() < 1e-9);
        assert!((cost.output_cost - 1.00).abs() < 1e-9);
        assert!((cost.total_cost - 3.50).abs() < 1e-9);
    }

    #[test]
    fn total_is_sum_and_non_negative_for_zero_usage() {
        let rates = RateCard { input_per_million: 0.55, output_per_million: 2.19 };
        let cost = compute_cost(&TokenUsage::default(), &rates);
        assert_eq!(cost.input_cost, 0.0);
        assert_eq!(cost.output_cost, 0.0);
        assert_eq!(cost.total_cost, cost.input_cost + cost.output_cost);
    }

    #[test]
    fn record_carries_turn_metadata() {
        let request = TurnRequest::new("s1", "ada@example.org", DataSource::Ahrf, "how many dentists?");
        let mut state = TurnState::new(&request.prompt);
        state.rephrased_query = "How many dentists practice in Texas?".into();
        state.streamed = "There are 17,060 dentists.".into();
        state.add_usage(&TokenUsage::new(1200, 340));

        let rates = RateCard { input_per_million: 2.50, output_per_million: 10.00 };
        let record = assemble_record(FinalResponse::empty(), &request, &state, 3, "gpt-4o", &rates);

        assert_eq!(record.id, "s1-3");
        assert_eq!(record.chat_id, 3);
        assert_eq!(record.total_input_tokens, 1200);
        assert_eq!(record.application_name, "AI Data Explorer");
        assert!(!record.show_sql);
        assert_eq!(record.total_cost, record.input_cost + record.output_cost);

        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(wire["sqlCode"], "");
        assert_eq!(wire["rephrasedPrompt"], "How many dentists practice in Texas?");
        assert_eq!(wire["dataSource"], "ahrf");
    }
}
