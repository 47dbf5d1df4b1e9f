// src/chat/response.rs
// Typed turn summary and the validation / self-repair loop

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::extract_json;
use crate::datasource::DataSource;
use crate::datasource::prompts::fill;
use crate::llm::{ModelClient, TokenUsage};

/// Schema cap on follow-up suggestions: five are requested from the model,
/// anything past four is dropped.
pub const FOLLOWUP_CAP: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Pie,
    Line,
}

/// Chart values: one series, or one inner list per named series.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Series {
    Single(Vec<f64>),
    Multi(Vec<Vec<f64>>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chart {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub x: Vec<String>,
    pub y: Series,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xlabel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ylabel: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<Vec<String>>,
}

impl Chart {
    /// Every series must line up with the x axis.
    fn check_lengths(&self) -> Result<(), String> {
        match &self.y {
            Series::Single(values) if values.len() != self.x.len() => Err(format!(
                "chart y length {} does not match x length {}",
                values.len(),
                self.x.len()
            )),
            Series::Multi(rows) => {
                for (i, row) in rows.iter().enumerate() {
                    if row.len() != self.x.len() {
                        return Err(format!(
                            "chart series {} length {} does not match x length {}",
                            i,
                            row.len(),
                            self.x.len()
                        ));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowupKind {
    Sql,
    Visualization,
    General,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Followup {
    #[serde(rename = "type")]
    pub kind: FollowupKind,
    pub label: String,
}

/// The machine-parseable result of a turn, stored verbatim on the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResponse {
    /// Required by the schema even when empty
    #[serde(rename = "sqlCode")]
    pub sql_code: String,
    #[serde(default)]
    pub visualization: Option<Chart>,
    #[serde(default)]
    pub followups: Vec<Followup>,
    #[serde(rename = "viewVisualization", default)]
    pub view_visualization: bool,
}

impl FinalResponse {
    /// The safe default persisted when validation cannot recover.
    pub fn empty() -> Self {
        Self {
            sql_code: String::new(),
            visualization: None,
            followups: Vec::new(),
            view_visualization: false,
        }
    }
}

/// Research turns only carry follow-up suggestions.
#[derive(Debug, Deserialize)]
struct ResearchResponse {
    #[serde(default)]
    followups: Vec<Followup>,
}

/// Schema description handed to the structured-generation and repair prompts.
pub fn format_instructions(source: DataSource) -> &'static str {
    if source.is_research() {
        r#"## response_format_instructions
Return a JSON object: {"followups": [{"type": "sql" | "visualization" | "general", "label": "<suggestion>"}]}"#
    } else {
        r#"## response_format_instructions
Return a JSON object:
{"sqlCode": "<SQL used, empty string if none>",
 "visualization": {"type": "bar" | "pie" | "line", "x": [<labels>], "y": [<numbers, or one list per series>],
                   "xlabel": "<optional>", "ylabel": "<optional>", "title": "<chart title>",
                   "series": [<optional series names>]} or null,
 "followups": [{"type": "sql" | "visualization" | "general", "label": "<suggestion>"}],
 "viewVisualization": <true if the user asked to see a chart>}"#
    }
}

/// Parse and schema-check one model output. Errors come back as text for
/// the repair prompt.
pub fn parse_final_response(raw: &str, source: DataSource) -> Result<FinalResponse, String> {
    let mut value: Value = serde_json::from_str(extract_json(raw))
        .map_err(|e| format!("JSON parse error: {}", e))?;

    // An explicitly empty chart object means "no chart"
    if value.get("visualization").map(|v| v == &Value::Object(Default::default())).unwrap_or(false)
    {
        value["visualization"] = Value::Null;
    }

    if source.is_research() {
        let research: ResearchResponse =
            serde_json::from_value(value).map_err(|e| format!("validation error: {}", e))?;
        let mut response = FinalResponse::empty();
        response.followups = research.followups;
        response.followups.truncate(FOLLOWUP_CAP);
        return Ok(response);
    }

    let mut response: FinalResponse =
        serde_json::from_value(value).map_err(|e| format!("validation error: {}", e))?;

    if let Some(chart) = &response.visualization {
        chart.check_lengths()?;
    }
    response.followups.truncate(FOLLOWUP_CAP);

    Ok(response)
}

const REPAIR_PROMPT: &str = r#"Verify the JSON parse or validation error: {error}
# Input:
{previous_output}
Expected output: the corrected JSON.
Do NOT modify or delete any value or characters that are already valid.
No math in JSON - if any math needs to be done, compute it.
{format_instructions}
JUST RETURN the JSON output, DO NOT ADD ANY EXTRA TEXT."#;

/// Bounded LLM-driven repair of malformed summaries. Never fails a turn:
/// terminal failure yields the safe default.
pub struct ResponseValidator<'a> {
    model: &'a dyn ModelClient,
    max_attempts: usize,
}

impl<'a> ResponseValidator<'a> {
    pub fn new(model: &'a dyn ModelClient, max_attempts: usize) -> Self {
        Self { model, max_attempts }
    }

    pub async fn validate(
        &self,
        raw: &str,
        source: DataSource,
        usage: &mut TokenUsage,
    ) -> FinalResponse {
        if raw.trim().is_empty() {
            return FinalResponse::empty();
        }

        let mut current = raw.to_string();
        let mut last_error = match parse_final_response(&current, source) {
            Ok(response) => return response,
            Err(e) => e,
        };

        for attempt in 1..=self.max_attempts {
            info!(
                datasource = source.as_str(),
                attempt,
                error = %last_error,
                "retrying JSON/validation fix via model"
            );

            let prompt = fill(REPAIR_PROMPT, &[
                ("error", &last_error),
                ("previous_output", &current),
                ("format_instructions", format_instructions(source)),
            ]);

            match self.model.invoke(&prompt).await {
                Ok(completion) => {
                    usage.add(&completion.usage);
                    current = completion.text;
                    match parse_final_response(&current, source) {
                        Ok(response) => return response,
                        Err(e) => last_error = e,
                    }
                }
                Err(e) => {
                    warn!(attempt, "repair model call failed: {}", e);
                    last_error = e.to_string();
                }
            }
        }

        FinalResponse::empty()
    }
}
