// src/datasource/mod.rs
// Supported analytical domains and their per-source pipeline profiles

use serde::{Deserialize, Serialize};

pub mod prompts;

/// One analytical domain. Each source carries its own prompt instructions
/// and forced-field policy; the pipeline itself is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Ahrf,
    Hpsa,
    Merative,
    Sohea,
    Dqddma,
    Research,
}

impl DataSource {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "ahrf" => Some(DataSource::Ahrf),
            "hpsa" => Some(DataSource::Hpsa),
            "merative" => Some(DataSource::Merative),
            "sohea" => Some(DataSource::Sohea),
            "dqddma" => Some(DataSource::Dqddma),
            "research" => Some(DataSource::Research),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Ahrf => "ahrf",
            DataSource::Hpsa => "hpsa",
            DataSource::Merative => "merative",
            DataSource::Sohea => "sohea",
            DataSource::Dqddma => "dqddma",
            DataSource::Research => "research",
        }
    }

    /// The research corpus is served by its own front-end application.
    pub fn application_name(&self) -> &'static str {
        match self {
            DataSource::Research => "AI Research Explorer",
            _ => "AI Data Explorer",
        }
    }

    /// Document-research turns never carry SQL or chart output.
    pub fn is_research(&self) -> bool {
        matches!(self, DataSource::Research)
    }

    pub fn all() -> &'static [DataSource] {
        &[
            DataSource::Ahrf,
            DataSource::Hpsa,
            DataSource::Merative,
            DataSource::Sohea,
            DataSource::Dqddma,
            DataSource::Research,
        ]
    }
}

/// Per-source pipeline parameterization: the prompt instructions for each
/// stage plus which optional stages run. Prompt content is domain
/// configuration, opaque to the pipeline.
pub struct SourceProfile {
    pub rephrase_instructions: &'static str,
    pub column_instructions: &'static str,
    pub query_instructions: &'static str,
    pub followup_examples: &'static str,
    /// Run the year-scope / denominator classifiers and, when flagged, the
    /// hierarchy mapping loop before column retrieval.
    pub needs_denominator_stages: bool,
}

static AHRF: SourceProfile = SourceProfile {
    rephrase_instructions: prompts::AHRF_REPHRASER,
    column_instructions: prompts::AHRF_COLUMNS,
    query_instructions: prompts::AHRF_QUERIES,
    followup_examples: prompts::AHRF_FOLLOWUPS,
    needs_denominator_stages: false,
};

static HPSA: SourceProfile = SourceProfile {
    rephrase_instructions: prompts::HPSA_REPHRASER,
    column_instructions: prompts::HPSA_COLUMNS,
    query_instructions: prompts::HPSA_QUERIES,
    followup_examples: prompts::HPSA_FOLLOWUPS,
    needs_denominator_stages: false,
};

static MERATIVE: SourceProfile = SourceProfile {
    rephrase_instructions: prompts::MERATIVE_REPHRASER,
    column_instructions: prompts::MERATIVE_COLUMNS,
    query_instructions: prompts::MERATIVE_QUERIES,
    followup_examples: prompts::MERATIVE_FOLLOWUPS,
    needs_denominator_stages: false,
};

static SOHEA: SourceProfile = SourceProfile {
    rephrase_instructions: prompts::SOHEA_REPHRASER,
    column_instructions: prompts::SOHEA_COLUMNS,
    query_instructions: prompts::SOHEA_QUERIES,
    followup_examples: prompts::SOHEA_FOLLOWUPS,
    needs_denominator_stages: true,
};

static DQDDMA: SourceProfile = SourceProfile {
    rephrase_instructions: prompts::DQDDMA_REPHRASER,
    column_instructions: prompts::DQDDMA_COLUMNS,
    query_instructions: prompts::DQDDMA_QUERIES,
    followup_examples: prompts::DQDDMA_FOLLOWUPS,
    needs_denominator_stages: false,
};

// The research corpus runs the document branch; its profile only feeds the
// followup examples into the structured-response stage.
static RESEARCH: SourceProfile = SourceProfile {
    rephrase_instructions: "",
    column_instructions: "",
    query_instructions: "",
    followup_examples: prompts::RESEARCH_FOLLOWUPS,
    needs_denominator_stages: false,
};

pub fn profile(source: DataSource) -> &'static SourceProfile {
    match source {
        DataSource::Ahrf => &AHRF,
        DataSource::Hpsa => &HPSA,
        DataSource::Merative => &MERATIVE,
        DataSource::Sohea => &SOHEA,
        DataSource::Dqddma => &DQDDMA,
        DataSource::Research => &RESEARCH,
    }
}
