//! PubMed Tools
//!
//! Literature search through NCBI E-utilities: `esearch` resolves the query
//! to PMIDs, `esummary` fetches the article summaries for those ids.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{bounded_count, get_json, required_str};
use crate::config::UpstreamSettings;
use crate::mcp::registry::{Collaborator, CollaboratorError, RegisteredTool, ToolBuilder};
use crate::mcp::schema::{FieldSpec, InputSchema};

const MAX_RESULTS_CAP: u64 = 100;
const SOURCE: &str = "PubMed";

pub fn pubmed_search_tool(http: reqwest::Client, upstream: &UpstreamSettings) -> RegisteredTool {
    ToolBuilder::new("pubmed_search")
        .description("Search PubMed for biomedical literature and return article summaries")
        .input_schema(
            InputSchema::new()
                .field(
                    "query",
                    FieldSpec::string()
                        .required()
                        .describe("PubMed search terms, e.g. 'asthma AND children'"),
                )
                .field(
                    "max_results",
                    FieldSpec::integer()
                        .default_value(10)
                        .describe("Maximum number of articles to return (1-100)"),
                ),
        )
        .build(Arc::new(PubMedSearch {
            http,
            base_url: upstream.pubmed_base_url.trim_end_matches('/').to_string(),
            api_key: upstream.ncbi_api_key.clone(),
        }))
}

pub struct PubMedSearch {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[async_trait]
impl Collaborator for PubMedSearch {
    async fn execute(&self, args: Value) -> Result<Value, CollaboratorError> {
        let query = required_str(&args, "query")?;
        let max_results = bounded_count(&args, "max_results", MAX_RESULTS_CAP)?;

        let mut search_params = vec![
            ("db", "pubmed".to_string()),
            ("term", query.to_string()),
            ("retmax", max_results.to_string()),
            ("retmode", "json".to_string()),
        ];
        self.push_api_key(&mut search_params);
        let search = get_json(
            self.http
                .get(format!("{}/esearch.fcgi", self.base_url))
                .query(&search_params),
            SOURCE,
        )
        .await?;
        let (total, ids) = parse_search(search)?;

        let articles = if ids.is_empty() {
            Vec::new()
        } else {
            let mut summary_params = vec![
                ("db", "pubmed".to_string()),
                ("id", ids.join(",")),
                ("retmode", "json".to_string()),
            ];
            self.push_api_key(&mut summary_params);
            let summary = get_json(
                self.http
                    .get(format!("{}/esummary.fcgi", self.base_url))
                    .query(&summary_params),
                SOURCE,
            )
            .await?;
            parse_summaries(summary, &ids)?
        };

        Ok(serde_json::to_value(SearchResult {
            query: query.to_string(),
            total_results: total,
            articles,
        })?)
    }
}

impl PubMedSearch {
    fn push_api_key(&self, params: &mut Vec<(&'static str, String)>) {
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
    }
}

// ============================================================================
// Upstream payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    esearchresult: SearchBody,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(default)]
    count: String,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    result: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SummaryDoc {
    #[serde(default)]
    title: String,
    #[serde(default)]
    fulljournalname: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    pubdate: String,
    #[serde(default)]
    authors: Vec<SummaryAuthor>,
    #[serde(default)]
    articleids: Vec<SummaryArticleId>,
}

#[derive(Debug, Deserialize)]
struct SummaryAuthor {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SummaryArticleId {
    idtype: String,
    value: String,
}

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub total_results: u64,
    pub articles: Vec<Article>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Article {
    pub pmid: String,
    pub title: String,
    pub journal: String,
    pub pub_date: String,
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    pub url: String,
}

fn parse_search(payload: Value) -> Result<(u64, Vec<String>), CollaboratorError> {
    let response: SearchResponse = serde_json::from_value(payload)?;
    if let Some(error) = response.esearchresult.error {
        return Err(CollaboratorError::Upstream(format!("{}: {}", SOURCE, error)));
    }
    let total = response.esearchresult.count.parse().unwrap_or(0);
    Ok((total, response.esearchresult.idlist))
}

/// Articles in the order of `ids`. Ids missing from the payload are skipped.
fn parse_summaries(payload: Value, ids: &[String]) -> Result<Vec<Article>, CollaboratorError> {
    let mut response: SummaryResponse = serde_json::from_value(payload)?;

    let mut articles = Vec::with_capacity(ids.len());
    for pmid in ids {
        let Some(raw) = response.result.remove(pmid) else {
            continue;
        };
        // NCBI reports per-id failures inline as {"uid": .., "error": ..}
        if raw.get("error").is_some() {
            continue;
        }
        let doc: SummaryDoc = serde_json::from_value(raw)?;
        let journal = if doc.fulljournalname.is_empty() {
            doc.source
        } else {
            doc.fulljournalname
        };
        let doi = doc
            .articleids
            .into_iter()
            .find(|id| id.idtype == "doi")
            .map(|id| id.value);

        articles.push(Article {
            pmid: pmid.clone(),
            title: doc.title,
            journal,
            pub_date: doc.pubdate,
            authors: doc.authors.into_iter().map(|a| a.name).collect(),
            doi,
            url: format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid),
        });
    }
    Ok(articles)
}
