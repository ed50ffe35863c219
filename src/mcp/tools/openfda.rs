//! openFDA drug lookups.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{required_str, upstream_error};
use crate::config::UpstreamSettings;
use crate::mcp::registry::{Collaborator, CollaboratorError, RegisteredTool, ToolBuilder};
use crate::mcp::schema::{FieldSpec, InputSchema};

const RESULT_LIMIT: u32 = 10;
const SOURCE: &str = "openFDA";

/// Longest label section returned verbatim.
const MAX_SECTION_CHARS: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    General,
    Label,
    AdverseEvents,
}

impl SearchType {
    fn endpoint(&self) -> &'static str {
        match self {
            SearchType::General => "drug/drugsfda.json",
            SearchType::Label => "drug/label.json",
            SearchType::AdverseEvents => "drug/event.json",
        }
    }

    fn search_expression(&self, drug_name: &str) -> String {
        let name = drug_name.replace('"', "");
        match self {
            SearchType::General | SearchType::Label => format!(
                "openfda.brand_name:\"{name}\" OR openfda.generic_name:\"{name}\""
            ),
            SearchType::AdverseEvents => format!("patient.drug.medicinalproduct:\"{name}\""),
        }
    }
}

pub fn fda_drug_lookup_tool(http: reqwest::Client, upstream: &UpstreamSettings) -> RegisteredTool {
    ToolBuilder::new("fda_drug_lookup")
        .description(
            "Look up a drug in openFDA: approvals (general), prescribing label, or adverse event reports",
        )
        .input_schema(
            InputSchema::new()
                .field(
                    "drug_name",
                    FieldSpec::string()
                        .required()
                        .describe("Brand or generic drug name"),
                )
                .field(
                    "search_type",
                    FieldSpec::string()
                        .one_of(["general", "label", "adverse_events"])
                        .default_value("general")
                        .describe("Which openFDA dataset to query"),
                ),
        )
        .build(Arc::new(FdaDrugLookup {
            http,
            base_url: upstream.openfda_base_url.trim_end_matches('/').to_string(),
        }))
}

pub struct FdaDrugLookup {
    http: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl Collaborator for FdaDrugLookup {
    async fn execute(&self, args: Value) -> Result<Value, CollaboratorError> {
        let drug_name = required_str(&args, "drug_name")?;
        let search_type: SearchType = match args.get("search_type") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => SearchType::General,
        };

        let response = self
            .http
            .get(format!("{}/{}", self.base_url, search_type.endpoint()))
            .query(&[
                ("search", search_type.search_expression(drug_name)),
                ("limit", RESULT_LIMIT.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        // openFDA answers 404 when nothing matches
        let payload = if status == StatusCode::NOT_FOUND {
            None
        } else if status.is_success() {
            Some(response.json::<Value>().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(SOURCE, status, &body));
        };

        let lookup = parse_lookup(drug_name, search_type, payload)?;
        Ok(serde_json::to_value(lookup)?)
    }
}

// ============================================================================
// Upstream payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct FdaResponse {
    #[serde(default)]
    meta: Option<FdaMeta>,
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FdaMeta {
    results: FdaMetaResults,
}

#[derive(Debug, Deserialize)]
struct FdaMetaResults {
    total: u64,
}

#[derive(Debug, Default, Deserialize)]
struct OpenFdaFields {
    #[serde(default)]
    brand_name: Vec<String>,
    #[serde(default)]
    generic_name: Vec<String>,
    #[serde(default)]
    route: Vec<String>,
    #[serde(default)]
    manufacturer_name: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApplicationRecord {
    #[serde(default)]
    application_number: String,
    #[serde(default)]
    sponsor_name: String,
    #[serde(default)]
    openfda: OpenFdaFields,
    #[serde(default)]
    products: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct LabelRecord {
    #[serde(default)]
    openfda: OpenFdaFields,
    #[serde(default)]
    indications_and_usage: Vec<String>,
    #[serde(default)]
    dosage_and_administration: Vec<String>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    boxed_warning: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    #[serde(default)]
    safetyreportid: String,
    #[serde(default)]
    receivedate: String,
    #[serde(default)]
    serious: Option<String>,
    #[serde(default)]
    patient: Option<EventPatient>,
}

#[derive(Debug, Deserialize)]
struct EventPatient {
    #[serde(default)]
    reaction: Vec<EventReaction>,
}

#[derive(Debug, Deserialize)]
struct EventReaction {
    #[serde(default)]
    reactionmeddrapt: String,
}

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DrugLookup {
    pub drug_name: String,
    pub search_type: SearchType,
    pub total: u64,
    pub results: Vec<Value>,
}

fn parse_lookup(
    drug_name: &str,
    search_type: SearchType,
    payload: Option<Value>,
) -> Result<DrugLookup, CollaboratorError> {
    let Some(payload) = payload else {
        return Ok(DrugLookup {
            drug_name: drug_name.to_string(),
            search_type,
            total: 0,
            results: Vec::new(),
        });
    };

    let response: FdaResponse = serde_json::from_value(payload)?;
    let total = response
        .meta
        .map(|meta| meta.results.total)
        .unwrap_or(response.results.len() as u64);

    let results = response
        .results
        .into_iter()
        .map(|raw| summarize(search_type, raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DrugLookup {
        drug_name: drug_name.to_string(),
        search_type,
        total,
        results,
    })
}

fn summarize(search_type: SearchType, raw: Value) -> Result<Value, CollaboratorError> {
    let summary = match search_type {
        SearchType::General => {
            let record: ApplicationRecord = serde_json::from_value(raw)?;
            serde_json::json!({
                "application_number": record.application_number,
                "sponsor_name": record.sponsor_name,
                "brand_names": record.openfda.brand_name,
                "generic_names": record.openfda.generic_name,
                "routes": record.openfda.route,
                "product_count": record.products.len(),
            })
        }
        SearchType::Label => {
            let record: LabelRecord = serde_json::from_value(raw)?;
            serde_json::json!({
                "brand_names": record.openfda.brand_name,
                "generic_names": record.openfda.generic_name,
                "manufacturers": record.openfda.manufacturer_name,
                "indications_and_usage": first_section(record.indications_and_usage),
                "dosage_and_administration": first_section(record.dosage_and_administration),
                "warnings": first_section(record.warnings),
                "boxed_warning": first_section(record.boxed_warning),
            })
        }
        SearchType::AdverseEvents => {
            let record: EventRecord = serde_json::from_value(raw)?;
            let reactions: Vec<String> = record
                .patient
                .map(|p| p.reaction.into_iter().map(|r| r.reactionmeddrapt).collect())
                .unwrap_or_default();
            serde_json::json!({
                "safety_report_id": record.safetyreportid,
                "receive_date": record.receivedate,
                "serious": record.serious.as_deref() == Some("1"),
                "reactions": reactions,
            })
        }
    };
    Ok(summary)
}

fn first_section(sections: Vec<String>) -> Option<String> {
    sections.into_iter().next().map(|text| {
        if text.chars().count() > MAX_SECTION_CHARS {
            let mut cut: String = text.chars().take(MAX_SECTION_CHARS).collect();
            cut.push_str("...");
            cut
        } else {
            text
        }
    })
}
