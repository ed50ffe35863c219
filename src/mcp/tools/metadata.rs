//! Article metadata by DOI, from the Crossref works API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{required_str, upstream_error};
use crate::config::UpstreamSettings;
use crate::mcp::registry::{Collaborator, CollaboratorError, RegisteredTool, ToolBuilder};
use crate::mcp::schema::{FieldSpec, InputSchema};

const SOURCE: &str = "Crossref";

const DOI_PREFIXES: [&str; 4] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "doi:",
];

pub fn article_metadata_tool(http: reqwest::Client, upstream: &UpstreamSettings) -> RegisteredTool {
    ToolBuilder::new("article_metadata")
        .description("Fetch bibliographic metadata (title, authors, journal, year) for a DOI")
        .input_schema(InputSchema::new().field(
            "doi",
            FieldSpec::string()
                .required()
                .describe("Digital Object Identifier, e.g. '10.1056/NEJMoa2034577'"),
        ))
        .build(Arc::new(ArticleMetadata {
            http,
            base_url: upstream.crossref_base_url.trim_end_matches('/').to_string(),
        }))
}

pub struct ArticleMetadata {
    http: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl Collaborator for ArticleMetadata {
    async fn execute(&self, args: Value) -> Result<Value, CollaboratorError> {
        let doi = normalize_doi(required_str(&args, "doi")?)?;

        let response = self
            .http
            .get(format!(
                "{}/works/{}",
                self.base_url,
                urlencoding::encode(&doi)
            ))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CollaboratorError::Upstream(format!(
                "{}: no record for DOI {}",
                SOURCE, doi
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(SOURCE, status, &body));
        }

        let metadata = parse_work(response.json::<Value>().await?)?;
        Ok(serde_json::to_value(metadata)?)
    }
}

fn normalize_doi(raw: &str) -> Result<String, CollaboratorError> {
    let mut doi = raw.trim();
    for prefix in DOI_PREFIXES {
        if doi
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            doi = &doi[prefix.len()..];
            break;
        }
    }
    if !doi.starts_with("10.") || !doi.contains('/') {
        return Err(CollaboratorError::InvalidArguments(format!(
            "'{}' is not a DOI",
            raw
        )));
    }
    Ok(doi.to_string())
}

// ============================================================================
// Upstream payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct WorkResponse {
    message: Work,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Work {
    #[serde(rename = "DOI")]
    doi: String,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<WorkAuthor>,
    #[serde(default)]
    container_title: Vec<String>,
    #[serde(default)]
    issued: Option<DateParts>,
    #[serde(default)]
    publisher: Option<String>,
    #[serde(rename = "type", default)]
    work_type: Option<String>,
    #[serde(rename = "URL", default)]
    url: Option<String>,
    #[serde(default)]
    is_referenced_by_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WorkAuthor {
    #[serde(default)]
    given: Option<String>,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DateParts {
    #[serde(default)]
    date_parts: Vec<Vec<Option<i64>>>,
}

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ArticleMetadataResult {
    pub doi: String,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub year: Option<i64>,
    pub publisher: Option<String>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    pub url: Option<String>,
    pub citation_count: Option<u64>,
}

fn parse_work(payload: Value) -> Result<ArticleMetadataResult, CollaboratorError> {
    let work = serde_json::from_value::<WorkResponse>(payload)?.message;

    let authors = work
        .author
        .into_iter()
        .filter_map(|author| match (author.given, author.family, author.name) {
            (Some(given), Some(family), _) => Some(format!("{} {}", given, family)),
            (None, Some(family), _) => Some(family),
            (_, None, Some(name)) => Some(name),
            _ => None,
        })
        .collect();

    let year = work
        .issued
        .and_then(|issued| issued.date_parts.into_iter().next())
        .and_then(|parts| parts.into_iter().next())
        .flatten();

    Ok(ArticleMetadataResult {
        doi: work.doi,
        title: work.title.into_iter().next(),
        authors,
        journal: work.container_title.into_iter().next(),
        year,
        publisher: work.publisher,
        work_type: work.work_type,
        url: work.url,
        citation_count: work.is_referenced_by_count,
    })
}
