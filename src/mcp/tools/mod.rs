//! MCP Tools
//!
//! Tool adapters over public medical data sources. Each adapter splits the
//! HTTP round trip from the parsing of the upstream payload so the latter can
//! be tested against canned responses.

pub mod bmi;
pub mod metadata;
pub mod openfda;
pub mod pubmed;
pub mod trials;

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use super::registry::{CollaboratorError, ToolRegistry};
use crate::config::UpstreamSettings;

/// Longest upstream error body quoted back to the client.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Register all tools with the registry
pub fn register_all_tools(registry: &mut ToolRegistry, upstream: &UpstreamSettings) -> Result<()> {
    let http = build_http_client(upstream)?;

    registry.register_tool(bmi::calculate_bmi_tool());
    registry.register_tool(pubmed::pubmed_search_tool(http.clone(), upstream));
    registry.register_tool(openfda::fda_drug_lookup_tool(http.clone(), upstream));
    registry.register_tool(trials::clinical_trials_search_tool(http.clone(), upstream));
    registry.register_tool(metadata::article_metadata_tool(http, upstream));

    Ok(())
}

pub fn build_http_client(upstream: &UpstreamSettings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(upstream.timeout_secs))
        .user_agent(upstream.user_agent.clone())
        .build()
        .context("Failed to build upstream HTTP client")
}

/// Sends `request` and decodes the JSON body, turning non-success statuses
/// into [`CollaboratorError::Upstream`].
pub(crate) async fn get_json(
    request: reqwest::RequestBuilder,
    source: &str,
) -> Result<Value, CollaboratorError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(upstream_error(source, status, &body));
    }
    Ok(response.json::<Value>().await?)
}

pub(crate) fn upstream_error(
    source: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> CollaboratorError {
    let snippet: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if snippet.is_empty() {
        CollaboratorError::Upstream(format!("{} returned {}", source, status))
    } else {
        CollaboratorError::Upstream(format!("{} returned {}: {}", source, status, snippet))
    }
}

/// Reads a `max_results` style argument, rejecting values below 1 and capping
/// at `cap`.
pub(crate) fn bounded_count(args: &Value, field: &str, cap: u64) -> Result<u64, CollaboratorError> {
    let value = args.get(field).and_then(Value::as_i64).unwrap_or(1);
    if value < 1 {
        return Err(CollaboratorError::InvalidArguments(format!(
            "{} must be at least 1",
            field
        )));
    }
    Ok((value as u64).min(cap))
}

/// Reads a required, non-blank string argument.
pub(crate) fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, CollaboratorError> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CollaboratorError::InvalidArguments(format!("{} must not be empty", field)))
}
