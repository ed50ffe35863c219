//! ClinicalTrials.gov search (API v2).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{bounded_count, get_json, required_str};
use crate::config::UpstreamSettings;
use crate::mcp::registry::{Collaborator, CollaboratorError, RegisteredTool, ToolBuilder};
use crate::mcp::schema::{FieldSpec, InputSchema};

const MAX_RESULTS_CAP: u64 = 100;
const SOURCE: &str = "ClinicalTrials.gov";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Recruiting,
    Completed,
    ActiveNotRecruiting,
    Any,
}

impl TrialStatus {
    /// Value for `filter.overallStatus`, or `None` to leave it out.
    fn filter(&self) -> Option<&'static str> {
        match self {
            TrialStatus::Recruiting => Some("RECRUITING"),
            TrialStatus::Completed => Some("COMPLETED"),
            TrialStatus::ActiveNotRecruiting => Some("ACTIVE_NOT_RECRUITING"),
            TrialStatus::Any => None,
        }
    }
}

pub fn clinical_trials_search_tool(
    http: reqwest::Client,
    upstream: &UpstreamSettings,
) -> RegisteredTool {
    ToolBuilder::new("clinical_trials_search")
        .description("Search ClinicalTrials.gov for studies of a condition")
        .input_schema(
            InputSchema::new()
                .field(
                    "condition",
                    FieldSpec::string()
                        .required()
                        .describe("Condition or disease, e.g. 'type 2 diabetes'"),
                )
                .field(
                    "status",
                    FieldSpec::string()
                        .one_of(["recruiting", "completed", "active_not_recruiting", "any"])
                        .default_value("recruiting")
                        .describe("Overall study status"),
                )
                .field(
                    "max_results",
                    FieldSpec::integer()
                        .default_value(10)
                        .describe("Maximum number of studies to return (1-100)"),
                ),
        )
        .build(Arc::new(ClinicalTrialsSearch {
            http,
            base_url: upstream
                .clinical_trials_base_url
                .trim_end_matches('/')
                .to_string(),
        }))
}

pub struct ClinicalTrialsSearch {
    http: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl Collaborator for ClinicalTrialsSearch {
    async fn execute(&self, args: Value) -> Result<Value, CollaboratorError> {
        let condition = required_str(&args, "condition")?;
        let status: TrialStatus = match args.get("status") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => TrialStatus::Recruiting,
        };
        let max_results = bounded_count(&args, "max_results", MAX_RESULTS_CAP)?;

        let mut params = vec![
            ("query.cond", condition.to_string()),
            ("pageSize", max_results.to_string()),
            ("countTotal", "true".to_string()),
            ("format", "json".to_string()),
        ];
        if let Some(filter) = status.filter() {
            params.push(("filter.overallStatus", filter.to_string()));
        }

        let payload = get_json(
            self.http
                .get(format!("{}/studies", self.base_url))
                .query(&params),
            SOURCE,
        )
        .await?;

        let studies = parse_studies(payload)?;
        Ok(serde_json::to_value(TrialSearch {
            condition: condition.to_string(),
            status,
            total: studies.total,
            studies: studies.studies,
        })?)
    }
}

// ============================================================================
// Upstream payloads
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudiesResponse {
    #[serde(default)]
    studies: Vec<RawStudy>,
    #[serde(default)]
    total_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStudy {
    protocol_section: ProtocolSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolSection {
    #[serde(default)]
    identification_module: IdentificationModule,
    #[serde(default)]
    status_module: StatusModule,
    #[serde(default)]
    conditions_module: ConditionsModule,
    #[serde(default)]
    design_module: DesignModule,
    #[serde(default)]
    sponsor_collaborators_module: SponsorModule,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentificationModule {
    #[serde(default)]
    nct_id: String,
    #[serde(default)]
    brief_title: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusModule {
    #[serde(default)]
    overall_status: String,
    #[serde(default)]
    start_date_struct: Option<DateStruct>,
}

#[derive(Debug, Deserialize)]
struct DateStruct {
    date: String,
}

#[derive(Debug, Default, Deserialize)]
struct ConditionsModule {
    #[serde(default)]
    conditions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DesignModule {
    #[serde(default)]
    phases: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SponsorModule {
    #[serde(default)]
    lead_sponsor: Option<LeadSponsor>,
}

#[derive(Debug, Deserialize)]
struct LeadSponsor {
    name: String,
}

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TrialSearch {
    pub condition: String,
    pub status: TrialStatus,
    pub total: u64,
    pub studies: Vec<Study>,
}

#[derive(Debug, Serialize)]
pub struct Study {
    pub nct_id: String,
    pub title: String,
    pub status: String,
    pub phases: Vec<String>,
    pub conditions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sponsor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    pub url: String,
}

struct ParsedStudies {
    total: u64,
    studies: Vec<Study>,
}

fn parse_studies(payload: Value) -> Result<ParsedStudies, CollaboratorError> {
    let response: StudiesResponse = serde_json::from_value(payload)?;
    let studies: Vec<Study> = response
        .studies
        .into_iter()
        .map(|raw| {
            let section = raw.protocol_section;
            let nct_id = section.identification_module.nct_id;
            Study {
                url: format!("https://clinicaltrials.gov/study/{}", nct_id),
                nct_id,
                title: section.identification_module.brief_title,
                status: section.status_module.overall_status,
                phases: section.design_module.phases,
                conditions: section.conditions_module.conditions,
                sponsor: section
                    .sponsor_collaborators_module
                    .lead_sponsor
                    .map(|s| s.name),
                start_date: section.status_module.start_date_struct.map(|d| d.date),
            }
        })
        .collect();

    Ok(ParsedStudies {
        total: response.total_count.unwrap_or(studies.len() as u64),
        studies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_filters() {
        assert_eq!(TrialStatus::Recruiting.filter(), Some("RECRUITING"));
        assert_eq!(
            TrialStatus::ActiveNotRecruiting.filter(),
            Some("ACTIVE_NOT_RECRUITING")
        );
        assert_eq!(TrialStatus::Any.filter(), None);
    }

    #[test]
    fn parses_studies() {
        let parsed = parse_studies(json!({
            "totalCount": 57,
            "studies": [{
                "protocolSection": {
                    "identificationModule": {"nctId": "NCT01234567", "briefTitle": "Inhaled therapy"},
                    "statusModule": {"overallStatus": "RECRUITING", "startDateStruct": {"date": "2023-05"}},
                    "conditionsModule": {"conditions": ["Asthma"]},
                    "designModule": {"phases": ["PHASE3"]},
                    "sponsorCollaboratorsModule": {"leadSponsor": {"name": "Acme Pharma"}}
                }
            }]
        }))
        .unwrap();

        assert_eq!(parsed.total, 57);
        let study = &parsed.studies[0];
        assert_eq!(study.nct_id, "NCT01234567");
        assert_eq!(study.phases, vec!["PHASE3"]);
        assert_eq!(study.sponsor.as_deref(), Some("Acme Pharma"));
        assert_eq!(study.start_date.as_deref(), Some("2023-05"));
        assert_eq!(study.url, "https://clinicaltrials.gov/study/NCT01234567");
    }

    #[test]
    fn sparse_studies_still_parse() {
        let parsed = parse_studies(json!({
            "studies": [{"protocolSection": {"identificationModule": {"nctId": "NCT0"}}}]
        }))
        .unwrap();

        assert_eq!(parsed.total, 1);
        assert!(parsed.studies[0].sponsor.is_none());
        assert!(parsed.studies[0].phases.is_empty());
    }

    #[test]
    fn empty_payload_has_no_studies() {
        let parsed = parse_studies(json!({})).unwrap();
        assert_eq!(parsed.total, 0);
        assert!(parsed.studies.is_empty());
    }
}
