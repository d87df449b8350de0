//! Azure DevOps provider
//!
//! Implements [`TestDataProvider`] over the Azure DevOps Test Plans and Test
//! REST APIs.
//! See: https://learn.microsoft.com/rest/api/azure/devops/testplan
//!
//! Suites, test cases and runs paginate through the `x-ms-continuationtoken`
//! response header. The results endpoint pages with `$top`/`$skip`; its skip
//! offset is carried as the continuation token so callers see one protocol.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::error::{ProviderError, ProviderResult};
use super::{Page, TestDataProvider};
use crate::config::AzureConfig;
use crate::types::{
    Outcome, PlanId, RunId, SuiteId, TestCase, TestResult, TestRun, TestSuiteNode,
};

const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";
const MAX_ERROR_BODY: usize = 512;

/// Azure DevOps REST provider
pub struct AzureDevOpsProvider {
    client: Client,
    config: AzureConfig,
}

impl AzureDevOpsProvider {
    pub fn new(config: AzureConfig) -> ProviderResult<Self> {
        let client = Client::builder().user_agent(&config.user_agent).build()?;
        Ok(Self { client, config })
    }

    /// Check that organization and project are set
    pub fn is_available(&self) -> bool {
        !self.config.organization_url.trim().is_empty() && !self.config.project.trim().is_empty()
    }

    fn api_url(&self, path: &str) -> ProviderResult<String> {
        if !self.is_available() {
            return Err(ProviderError::NotConfigured(
                "Azure DevOps organization URL and project are required".to_string(),
            ));
        }
        Ok(format!(
            "{}/{}/_apis/{}",
            self.config.organization_url.trim_end_matches('/'),
            self.config.project,
            path
        ))
    }

    /// GET one page of a `{ "value": [...] }` list response
    async fn get_page<W: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> ProviderResult<(Vec<W>, Option<String>)> {
        let mut request = self
            .client
            .get(url)
            .query(&[("api-version", self.config.api_version.as_str())])
            .query(query);

        if let Some(pat) = self.config.pat.as_deref().filter(|p| !p.is_empty()) {
            request = request.basic_auth("", Some(pat));
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token = response
            .headers()
            .get(CONTINUATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let bytes = response.bytes().await?;
        let parsed: ListResponse<W> = serde_json::from_slice(&bytes)?;

        debug!(items = parsed.value.len(), has_more = token.is_some(), "page received");
        Ok((parsed.value, token))
    }
}

// Azure DevOps API response types
#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WireReference {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSuite {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parent_suite: Option<WireReference>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTestCaseEntry {
    #[serde(default)]
    work_item: Option<WireReference>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRun {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    started_date: Option<String>,
    #[serde(default)]
    completed_date: Option<String>,
    #[serde(default)]
    total_tests: Option<u32>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    #[serde(default)]
    test_case: Option<WireReference>,
    #[serde(default)]
    outcome: Option<String>,
    #[serde(default)]
    completed_date: Option<String>,
}

/// Ids arrive as numbers on some endpoints and strings on others
pub(crate) fn parse_id(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse an upstream timestamp; unparseable input yields `None`
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Some endpoints omit the offset
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn token_query(continuation: Option<String>) -> Vec<(&'static str, String)> {
    continuation
        .map(|token| vec![("continuationToken", token)])
        .unwrap_or_default()
}

#[async_trait]
impl TestDataProvider for AzureDevOpsProvider {
    fn name(&self) -> &str {
        "azure-devops"
    }

    fn ensure_ready(&self) -> ProviderResult<()> {
        self.api_url("").map(|_| ())
    }

    #[instrument(skip(self, continuation))]
    async fn list_suites(
        &self,
        plan_id: PlanId,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestSuiteNode>> {
        let url = self.api_url(&format!("testplan/Plans/{}/suites", plan_id))?;
        let (wire, token) = self
            .get_page::<WireSuite>(&url, &token_query(continuation))
            .await?;

        let items = wire
            .into_iter()
            .filter_map(|s| {
                Some(TestSuiteNode {
                    id: s.id.as_ref().and_then(parse_id)?,
                    parent_id: s
                        .parent_suite
                        .and_then(|p| p.id)
                        .as_ref()
                        .and_then(parse_id),
                    name: s.name,
                })
            })
            .collect();

        Ok(Page {
            items,
            continuation_token: token,
        })
    }

    #[instrument(skip(self, continuation))]
    async fn list_test_cases(
        &self,
        plan_id: PlanId,
        suite_id: SuiteId,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestCase>> {
        let url = self.api_url(&format!(
            "testplan/Plans/{}/Suites/{}/TestCase",
            plan_id, suite_id
        ))?;
        let (wire, token) = self
            .get_page::<WireTestCaseEntry>(&url, &token_query(continuation))
            .await?;

        let items = wire
            .into_iter()
            .filter_map(|entry| {
                let work_item = entry.work_item?;
                let id = work_item.id.as_ref().and_then(parse_id)?;
                Some(TestCase {
                    id,
                    name: work_item.name.unwrap_or_default(),
                })
            })
            .collect();

        Ok(Page {
            items,
            continuation_token: token,
        })
    }

    #[instrument(skip(self, start, end, continuation), fields(start = %start, end = %end))]
    async fn list_runs(
        &self,
        plan_id: PlanId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestRun>> {
        let url = self.api_url("test/runs")?;
        let mut query = vec![
            (
                "minLastUpdatedDate",
                start.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "maxLastUpdatedDate",
                end.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("planIds", plan_id.to_string()),
        ];
        query.extend(token_query(continuation));

        let (wire, token) = self.get_page::<WireRun>(&url, &query).await?;

        let items = wire
            .into_iter()
            .filter_map(|r| {
                Some(TestRun {
                    id: r.id.as_ref().and_then(parse_id)?,
                    name: r.name.unwrap_or_default(),
                    started_date: r.started_date.as_deref().and_then(parse_timestamp),
                    completed_date: r.completed_date.as_deref().and_then(parse_timestamp),
                    total_tests: r.total_tests.unwrap_or(0),
                    state: r.state,
                })
            })
            .collect();

        Ok(Page {
            items,
            continuation_token: token,
        })
    }

    #[instrument(skip(self, continuation))]
    async fn list_results(
        &self,
        run_id: RunId,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestResult>> {
        let url = self.api_url(&format!("test/Runs/{}/results", run_id))?;
        let skip: usize = continuation
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let top = self.config.page_size.max(1);

        let query = vec![("$top", top.to_string()), ("$skip", skip.to_string())];
        let (wire, _) = self.get_page::<WireResult>(&url, &query).await?;

        let received = wire.len();
        let items = wire
            .into_iter()
            .filter_map(|r| {
                Some(TestResult {
                    test_case_id: r.test_case?.id.as_ref().and_then(parse_id)?,
                    outcome: Outcome::from(r.outcome.unwrap_or_default()),
                    completed_date: r.completed_date.as_deref().and_then(parse_timestamp),
                })
            })
            .collect();

        let continuation_token = (received >= top).then(|| (skip + received).to_string());

        Ok(Page {
            items,
            continuation_token,
        })
    }
}
