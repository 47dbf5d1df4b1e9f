// src/datasource/prompts.rs
// Prompt templates and per-source instruction blocks. All of this is domain
// configuration: the pipeline treats the text as opaque and only fills the
// named placeholders.

/// Substitute `{name}` placeholders. Unknown placeholders are left intact so
/// prompt edits fail loudly in review rather than silently.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

// ============================================================================
// Shared stage templates
// ============================================================================

pub const INTENT_CLASSIFIER: &str = r#"You are the intent classifier for a health-data analytics assistant.
Decide whether the user's message needs the downstream retrieval pipeline or can be answered directly
(greetings, thanks, questions already answered verbatim in the chat history).

User message: {user_question}
Chat history (most recent first): {chat_history}

Return ONLY a JSON object:
{"context_required": <bool>, "chatId": [<ids of prior turns this message refers to>],
 "response": "<direct answer when no pipeline run is needed, else empty>",
 "run_downstream_llm": <bool>, "rephrased_query": "<self-contained restatement of the question>"}"#;

pub const RESEARCH_INTENT_CLASSIFIER: &str = r#"You are the intent classifier for a research-publication assistant.
Decide whether the user's message needs document retrieval or can be answered directly.

User message: {user_question}
Chat history (most recent first): {chat_history}

Return ONLY a JSON object:
{"context_required": <bool>, "chatId": [<ids of prior turns this message refers to>],
 "response": "<direct answer when no retrieval is needed, else empty>",
 "run_downstream_llm": <bool>, "rephrased_query": "<self-contained restatement of the question>"}"#;

pub const USER_PROMPT_REPHRASER: &str = r#"Rewrite the user question into one or more precise, self-contained
analytical questions for the data source described below. Resolve pronouns and references against the
chat history. Do not answer the question.

{datasource_specific_instructions}

User question: {user_question}
Chat history: {chat_history}

Return only the rephrased question text."#;

pub const COLUMN_RETRIEVER: &str = r#"Locate every column needed to answer the question below. Use the tools to
search the data catalog; inspect table metadata when the catalog hit is ambiguous. Report the relevant
tables, column names, and why each is needed.

{data_source_specific_instruction}

{question}
Chat history: {chat_history}"#;

pub const QUERY_GENERATOR: &str = r#"Write and execute read-only SQL to answer the question, using only the
columns identified below. Only SELECT statements are permitted. If a DISTINCT result would exceed 100 rows,
add a LIMIT and order by the most relevant measure before returning. Validate query output before relying
on it and gather every figure the final answer needs.

{datasource_specific_instructions}

{question}
Relevant columns: {parsed_relevant_columns}
Chat history: {chat_history}"#;

pub const RESPONSE_GENERATOR: &str = r#"Write the final answer for the user from the retrieval record below.
Be precise with figures, name the years and populations involved, and keep the tone of an analyst
presenting results. Do not mention tools, SQL, or intermediate steps.

Retrieval record:
{agent_outputs}"#;

pub const STRUCTURED_RESPONSE_GENERATOR: &str = r#"Produce the machine-readable summary of this turn from the
retrieval record. Include the SQL used (empty string if none), the best chart for the result if one fits
(bar, pie or line; leave it out otherwise), up to five follow-up suggestions in the style of the examples,
and whether the user explicitly asked for a visualization.

Retrieval record:
{agent_outputs}

User question: {user_question}
Follow-up style examples: {datasource_specific_user_prompts}

{response_format_instructions}
JUST RETURN the JSON output, DO NOT ADD ANY EXTRA TEXT."#;

// ============================================================================
// Research (document corpus) stage templates
// ============================================================================

pub const RESEARCH_DECISION: &str = r#"Decide how to search the research corpus for the question below: whether
whole documents or sections are needed, how many documents to read, and which search terms to use.
Answer in two or three sentences.

{user_question}"#;

pub const RESEARCH_RETRIEVER: &str = r#"Answer the question from the research-publication corpus. Use the tools
to find the most relevant articles and read the sections you need. Cite article titles and publication years
in the answer. If the corpus does not cover the question, say so.

{user_question}
{original_rephrased_question}
Search plan: {decision_response}
Chat history: {chat_history}"#;

pub const RESEARCH_STRUCTURED_RESPONSE_GENERATOR: &str = r#"Produce the machine-readable summary of this
research turn: up to five follow-up suggestions grounded in the retrieval record and the search plan.

Retrieval record:
{agent_outputs}

Search plan: {decision_response}

{response_format_instructions}
JUST RETURN the JSON output, DO NOT ADD ANY EXTRA TEXT."#;

// ============================================================================
// Oral-health survey classifier templates
// ============================================================================

pub const YEAR_SCOPE_CLASSIFIER: &str = r#"Classify the survey years the question asks about.

Question: {user_question}

Return ONLY a JSON object: {"year_scope": "single" | "multi" | "unknown", "years": [<year numbers>]}"#;

pub const DENOMINATOR_CLASSIFIER: &str = r#"Decide whether answering the question requires a survey denominator
(a percentage, rate, or share of a population) rather than a raw count.

Question: {user_question}

Return ONLY a JSON object: {"denominator_required": <bool>}"#;

pub const HIERARCHY_MAPPING: &str = r#"Work out the numerator and denominator question hierarchy for the survey
question below. Read the question mapping file, find the immediate parent question of every variable involved,
and report the parent/child variable names and level codes the downstream SQL must filter on.

{question}"#;

/// Suffix appended to the column instructions after the year-scope stage.
pub const YEAR_SCOPE_SUFFIX: &str =
    " .. YearNumbers {years} Must inform the downstream step to use these year numbers.";

/// Suffix appended to the column instructions when the mapping loop ran.
pub const DENOMINATOR_SUFFIX: &str = r#"
Use the denominator and numerator logic below and verify it against each column description. Select every
column the denominator logic requires, choose the immediate parent question only, and keep the level codes
of the corresponding child questions when filtering denominator data; level codes may differ per year, so
take the latest values from the database.
{mapping_logic}"#;

// ============================================================================
// Per-source instruction blocks
// ============================================================================

pub const AHRF_REPHRASER: &str = "The source is the Area Health Resources Files: county, state and national \
counts of health professions, facilities, population characteristics and utilization. Make the geography \
level (county vs state) and release year explicit.";

pub const AHRF_COLUMNS: &str = "Search the AHRF catalog. County questions resolve against the county survey \
table, state and national questions against the state/national survey table. Variables are keyed by \
source_variable_name; always include the population column when a ratio is requested.";

pub const AHRF_QUERIES: &str = "Query the AHRF survey tables. Filter on release_year_number, and on \
state_code or county_name to match the question's geography. Rates per 100,000 population use the popn \
variable as the denominator.";

pub const HPSA_REPHRASER: &str = "The source is the Health Professional Shortage Area designations for dental \
care. Make the designation type, geography and date window explicit.";

pub const HPSA_COLUMNS: &str = "Search the HPSA catalog. Designations, shortage ratios and population counts \
live in the dental HPSA table; rural/urban status is a column, not a separate table.";

pub const HPSA_QUERIES: &str = "Query the dental HPSA table. Designation dates are strings in ISO order; \
compare them lexicographically. Shortage progress is the ratio of providers needed to providers present.";

pub const MERATIVE_REPHRASER: &str = "The source is the claims warehouse: dental and medical claims, encounters \
and enrollment summaries. Make the claim year, line of business and member population explicit, and preserve \
any 'distinct claim header' qualifier.";

pub const MERATIVE_COLUMNS: &str = "Search the claims catalog. Diagnosis and procedure filters need the \
reference code lookup tables (CDT, ICD, CPT); request them through the selected_table_name field. Claim, \
encounter and enrollment summaries are separate views.";

pub const MERATIVE_QUERIES: &str = "Query the claims summary views. Count distinct claim headers unless the \
question asks otherwise, join code lookups on the code value columns, and filter the service year from the \
claim service date.";

pub const SOHEA_REPHRASER: &str = "The source is the State of Oral Health Equity survey: weighted responses on \
care access, insurance and oral-health status. Make the survey years and the weighted/unweighted choice \
explicit.";

pub const SOHEA_COLUMNS: &str = "Search the oral-health survey catalog. Responses are keyed by question \
variable and level code; weighted answers need the weight-group columns. Percentages require both the \
numerator and denominator question variables.";

pub const SOHEA_QUERIES: &str = "Query the survey response table. Weighted results multiply by the weight \
column before aggregating; unweighted results count respondents. Filter year_number to the requested survey \
years and level codes to the requested answer levels.";

pub const DQDDMA_REPHRASER: &str = "The source is the dental data-quality mart. Make the measure, reporting \
period and cohort explicit.";

pub const DQDDMA_COLUMNS: &str = "Search the data catalog scoped to the data-quality mart tables.";

pub const DQDDMA_QUERIES: &str = "Query the data-quality mart tables; measures are pre-aggregated by \
reporting period.";

// ============================================================================
// Follow-up suggestion examples (shown to the structured-response stage)
// ============================================================================

pub const AHRF_FOLLOWUPS: &str = r#"state: ["How many dentists are practicing in California?",
"How many female dentists are in Arizona compared to California?",
"What is the dentist-to-population ratio in New York?"]
county: ["Which counties have the highest number of dentists per 100,000 population?",
"What is the dentist-to-population ratio by county in Texas?"]"#;

pub const HPSA_FOLLOWUPS: &str = r#"["Which are the top 5 counties with the highest population-to-provider ratio in HPSA designated regions for dental care?",
"How many dental HPSAs were there in 2022?",
"What are the five states with the highest number of HPSA-designated counties?"]"#;

pub const MERATIVE_FOLLOWUPS: &str = r#"["How many people were diagnosed with diabetes in 2023?",
"What are the 25 most frequently performed dental treatments in 2023?",
"How many distinct individuals had restorative procedures (CDT/CPT) across all years of data?"]"#;

pub const SOHEA_FOLLOWUPS: &str = r#"["What percentage of the population has lost all their teeth?",
"What is the percentage of the population without dental insurance by race?",
"What percentage of American adults have private dental insurance?"]"#;

pub const DQDDMA_FOLLOWUPS: &str = "[]";

pub const RESEARCH_FOLLOWUPS: &str = r#"["What systemic health conditions are linked with poor oral health?",
"How many children and adults go to an emergency department for dental care?",
"Summarize the findings from each article that discusses differences in dental care access between urban and rural areas."]"#;
