// src/metadata/mod.rs
// Descriptive metadata per data source: table descriptions plus DESCRIBE
// output and a handful of preview rows, for the front-end's source pages.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::datasource::DataSource;
use crate::tools::WarehouseClient;

/// Preview rows fetched per table
const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Serialize)]
pub struct TableMetadata {
    #[serde(rename = "tableName")]
    pub table_name: String,
    pub description: String,
    pub metadata: Vec<Value>,
    pub records: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct SourceMetadata {
    pub datasource: String,
    pub description: String,
    pub tables: Vec<TableMetadata>,
}

struct TableSpec {
    name: &'static str,
    schema: &'static str,
    description: &'static str,
    /// Extra WHERE clause narrowing the preview to representative rows
    preview_filter: &'static str,
}

pub struct MetadataService {
    warehouse: Arc<WarehouseClient>,
    db_schema: String,
    fanout_width: usize,
}

impl MetadataService {
    pub fn new(warehouse: Arc<WarehouseClient>, db_schema: String, fanout_width: usize) -> Self {
        Self { warehouse, db_schema, fanout_width }
    }

    /// Assemble the metadata payload for one source. Claims tables are
    /// fetched concurrently; a failing table is omitted and the rest
    /// proceed.
    pub async fn describe(&self, source: DataSource) -> SourceMetadata {
        let (description, specs) = source_tables(source);

        let tables = stream::iter(specs)
            .map(|spec| self.fetch_table(spec))
            .buffer_unordered(self.fanout_width.max(1))
            .filter_map(|table| async move { table })
            .collect::<Vec<_>>()
            .await;

        SourceMetadata {
            datasource: source.as_str().to_string(),
            description: description.to_string(),
            tables,
        }
    }

    async fn fetch_table(&self, spec: TableSpec) -> Option<TableMetadata> {
        let table_path = format!("{}.{}.{}", self.db_schema, spec.schema, spec.name);
        let preview_sql = format!(
            "SELECT DISTINCT * FROM {} {} LIMIT {}",
            table_path, spec.preview_filter, PREVIEW_ROWS
        );

        let metadata = match self.warehouse.describe(&table_path).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table = spec.name, "table describe failed, omitting: {}", e);
                return None;
            }
        };
        let records = match self.warehouse.execute(&preview_sql).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table = spec.name, "table preview failed, omitting: {}", e);
                return None;
            }
        };

        Some(TableMetadata {
            table_name: spec.name.to_string(),
            description: spec.description.to_string(),
            metadata,
            records,
        })
    }
}

fn source_tables(source: DataSource) -> (&'static str, Vec<TableSpec>) {
    match source {
        DataSource::Ahrf => (
            "Provides information on health care professions, health facilities, population \
             characteristics, economics, health professions training, hospital utilization, hospital \
             expenditures, and the environment at the county, state, and national levels.",
            vec![
                TableSpec {
                    name: "sem_ahrf_state_national_survey",
                    schema: "sem_survey",
                    description: "The table containing health resources data aggregated at the state and national levels.",
                    preview_filter: "WHERE source_variable_name IN ('dent', 'dent_asst', 'dent_hygn', 'dent_fem', 'dent_mal') AND state_code='CA' AND release_year_number=2022",
                },
                TableSpec {
                    name: "sem_ahrf_county_survey",
                    schema: "sem_survey",
                    description: "The table containing county-level health resources data.",
                    preview_filter: "WHERE source_variable_name IN ('md_nf_activ', 'dent_npi', 'dent_npi_fem', 'dent_npi_mal', 'popn') AND county_name='Los Angeles' AND release_year_number=2022",
                },
            ],
        ),
        DataSource::Hpsa => (
            "Health Professional Shortage Area data identifies geographic areas, populations, or \
             facilities with shortages of health providers. It is used to allocate resources and \
             support underserved communities.",
            vec![TableSpec {
                name: "sem_hpsa_dental",
                schema: "sem_survey",
                description: "Health Professional Shortage Area designations: HPSA ids, names, designation dates, and population and shortage-ratio metrics.",
                preview_filter: "",
            }],
        ),
        DataSource::Sohea => (
            "The oral-health-equity survey includes detailed information on care requests, demographic \
             identifiers, weight groups, response values, and the original survey questions, supporting \
             trend analysis and evaluation of care strategies.",
            vec![TableSpec {
                name: "sem_sohea_survey",
                schema: "sem_sohea",
                description: "Survey responses keyed by question variable: weight groups, response values, and the original questions posed.",
                preview_filter: "",
            }],
        ),
        DataSource::Merative => (
            "The claims schema houses data on dental and medical services, including patient \
             demographics, provider information, treatment details, and financial breakdowns, covering \
             patient encounters, claims processing, and insurance enrollments.",
            vec![
                TableSpec {
                    name: "vw_sem_merative_claim_summary",
                    schema: "sem_merative",
                    description: "Healthcare claims: claim identifiers, member details, service dates, procedure codes, and payment amounts.",
                    preview_filter: "",
                },
                TableSpec {
                    name: "vw_sem_merative_encounter_summary",
                    schema: "sem_merative",
                    description: "Healthcare encounters per member: inpatient and outpatient claim counts, payment amounts, and procedure counts.",
                    preview_filter: "",
                },
                TableSpec {
                    name: "vw_sem_merative_enrollment_summary",
                    schema: "sem_merative",
                    description: "Member enrollments: enrollment periods, coverage types, and enrollment-duration indicators.",
                    preview_filter: "",
                },
            ],
        ),
        DataSource::Dqddma => (
            "Dental data-quality mart: pre-aggregated measures by reporting period.",
            Vec::new(),
        ),
        DataSource::Research => (
            "Peer-reviewed research publications on oral health, indexed for semantic retrieval.",
            Vec::new(),
        ),
    }
}
