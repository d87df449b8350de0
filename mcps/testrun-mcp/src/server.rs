//! MCP Server implementation for test-run analysis
//!
//! Exposes the analyzer as tools. Reports are cached per
//! (plan, suite, min ROC) because a full analysis can take minutes.

use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use testrun_analyzer::{AnalysisError, AnalysisEvent, AnalysisRequest, Analyzer, Config, Report};
use tokio_util::sync::CancellationToken;

use crate::cache::ReportCache;

/// The main Test Run MCP Server
#[derive(Clone)]
pub struct TestRunMcpServer {
    analyzer: Arc<Analyzer>,
    cache: Arc<ReportCache>,
    tool_router: ToolRouter<Self>,
}

// ============================================================================
// Parameter Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeParams {
    #[schemars(description = "Azure DevOps test plan id")]
    pub plan_id: Option<u32>,
    #[schemars(description = "Target suite id; its descendant suites are included")]
    pub suite_id: Option<u32>,
    #[schemars(description = "Minimum day-over-day increase in executed tests (default: configured value, usually 0)")]
    pub min_roc: Option<i64>,
    #[schemars(description = "Ignore any cached report and analyze again (default: false)")]
    pub refresh: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SuiteParams {
    #[schemars(description = "Azure DevOps test plan id")]
    pub plan_id: Option<u32>,
    #[schemars(description = "Target suite id")]
    pub suite_id: Option<u32>,
}

fn to_mcp_error(err: AnalysisError) -> McpError {
    if err.is_configuration() {
        McpError::invalid_params(err.to_string(), None)
    } else {
        McpError::internal_error(err.to_string(), None)
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

// ============================================================================
// Tool Router Implementation
// ============================================================================

#[tool_router]
impl TestRunMcpServer {
    pub fn new(config: Config) -> Result<Self> {
        let analyzer = Analyzer::from_config(&config)?;
        Ok(Self::with_analyzer(analyzer, ReportCache::from_config(&config.cache)))
    }

    pub fn with_analyzer(analyzer: Analyzer, cache: ReportCache) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            cache: Arc::new(cache),
            tool_router: Self::tool_router(),
        }
    }

    async fn run_analysis(&self, request: AnalysisRequest) -> Result<Report, McpError> {
        let cancel = CancellationToken::new();
        // the handler future is dropped when the client cancels or disconnects
        let _cancel_on_drop = cancel.clone().drop_guard();
        let (handle, mut events) = self.analyzer.clone().analyze_streamed(request, cancel);

        let mut outcome = Err(McpError::internal_error("analysis ended without a report", None));
        while let Some(event) = events.recv().await {
            match event {
                AnalysisEvent::Progress {
                    stage,
                    message,
                    percent,
                    ..
                } => tracing::debug!(%stage, percent, "{}", message),
                AnalysisEvent::Report { report } => outcome = Ok(*report),
                AnalysisEvent::Failed {
                    message,
                    configuration: true,
                } => outcome = Err(McpError::invalid_params(message, None)),
                AnalysisEvent::Failed { message, .. } => {
                    outcome = Err(McpError::internal_error(message, None))
                }
            }
        }

        handle
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        outcome
    }

    // ========================================================================
    // Analysis Tools
    // ========================================================================

    #[tool(description = "Detect release events in a test suite's run history over the last 12 months. \
        For each event reports the resolved date window, found / not-found / off-suite test cases, \
        flaky tests (executed more than once) and first-vs-last execution pass rates.")]
    async fn analyze_test_runs(
        &self,
        Parameters(params): Parameters<AnalyzeParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = AnalysisRequest {
            plan_id: params.plan_id,
            suite_id: params.suite_id,
            min_roc: params.min_roc,
            as_of: None,
        };
        // reject missing ids before touching the cache
        let (plan_id, suite_id) = request.validate().map_err(to_mcp_error)?;
        let min_roc = params.min_roc.unwrap_or(self.analyzer.settings().min_roc);
        let key = (plan_id, suite_id, min_roc);

        if !params.refresh.unwrap_or(false) {
            if let Some(report) = self.cache.get(&key) {
                tracing::info!(plan_id, suite_id, min_roc, "Serving cached report");
                return json_result(report.as_ref());
            }
        }

        tracing::info!(plan_id, suite_id, min_roc, "Analyzing test runs");
        let report = Arc::new(self.run_analysis(request).await?);
        self.cache.insert(key, report.clone());
        json_result(report.as_ref())
    }

    #[tool(description = "List the expected test cases of a suite and all its descendant suites.")]
    async fn resolve_suite(
        &self,
        Parameters(params): Parameters<SuiteParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = AnalysisRequest {
            plan_id: params.plan_id,
            suite_id: params.suite_id,
            ..Default::default()
        };
        let (plan_id, suite_id) = request.validate().map_err(to_mcp_error)?;

        let expected = self
            .analyzer
            .resolve_suite(plan_id, suite_id)
            .await
            .map_err(to_mcp_error)?;
        json_result(&expected.listing(plan_id, suite_id))
    }

    #[tool(description = "Get report cache statistics (hits, misses, size, TTL).")]
    async fn cache_stats(&self) -> Result<CallToolResult, McpError> {
        json_result(&self.cache.stats())
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

#[tool_handler]
impl rmcp::ServerHandler for TestRunMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Test Run Analysis MCP Server - detects release events in Azure DevOps \
                 test plan history and reports coverage, flaky tests and pass rates per \
                 event. Analyses can take minutes; results are cached."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::ErrorCode;
    use std::time::Duration;
    use testrun_analyzer::config::AnalysisConfig;
    use testrun_analyzer::{MemoryProvider, Outcome, RetryPolicy, TestResult, TestRun};

    fn server(provider: Arc<MemoryProvider>) -> TestRunMcpServer {
        let analyzer =
            Analyzer::new(provider, AnalysisConfig::default()).with_retry(RetryPolicy::none());
        TestRunMcpServer::with_analyzer(analyzer, ReportCache::new(true, 8, Duration::from_secs(60)))
    }

    fn provider() -> Arc<MemoryProvider> {
        let completed = chrono::Utc::now() - chrono::Duration::days(3);
        Arc::new(
            MemoryProvider::new()
                .with_suite(1, None)
                .with_test_cases(1, [(101, "Login")])
                .with_run(
                    TestRun {
                        id: 1,
                        name: "Regression".into(),
                        started_date: None,
                        completed_date: Some(completed),
                        total_tests: 1,
                        state: None,
                    },
                    vec![TestResult {
                        test_case_id: 101,
                        outcome: Outcome::Passed,
                        completed_date: None,
                    }],
                ),
        )
    }

    fn text(result: &CallToolResult) -> serde_json::Value {
        let value = serde_json::to_value(result).unwrap();
        let text = value["content"][0]["text"].as_str().unwrap().to_string();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_tools_registered() {
        let server = server(provider());
        let tools = server.tool_router.list_all();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert!(names.contains(&"analyze_test_runs"));
        assert!(names.contains(&"resolve_suite"));
        assert!(names.contains(&"cache_stats"));
    }

    #[tokio::test]
    async fn test_analysis_is_cached() {
        let provider = provider();
        let server = server(provider.clone());
        let params = || AnalyzeParams {
            plan_id: Some(5),
            suite_id: Some(1),
            min_roc: None,
            refresh: None,
        };

        let first = server.analyze_test_runs(Parameters(params())).await.unwrap();
        assert_eq!(text(&first)["totalRuns"], 1);
        server.analyze_test_runs(Parameters(params())).await.unwrap();
        assert_eq!(provider.result_calls(1), 1);

        let stats = text(&server.cache_stats().await.unwrap());
        assert_eq!(stats["hits"], 1);
        assert_eq!(stats["misses"], 1);

        let refreshed = AnalyzeParams {
            refresh: Some(true),
            ..params()
        };
        server.analyze_test_runs(Parameters(refreshed)).await.unwrap();
        assert_eq!(provider.result_calls(1), 2);
    }

    #[tokio::test]
    async fn test_missing_ids_are_invalid_params() {
        let server = server(provider());
        let err = server
            .analyze_test_runs(Parameters(AnalyzeParams {
                plan_id: None,
                suite_id: Some(1),
                min_roc: None,
                refresh: None,
            }))
            .await
            .unwrap_err();
        assert!(err.message.contains("plan id is required"));

        let err = server
            .resolve_suite(Parameters(SuiteParams {
                plan_id: Some(1),
                suite_id: None,
            }))
            .await
            .unwrap_err();
        assert!(err.message.contains("suite id is required"));
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_invalid_params() {
        let server = TestRunMcpServer::new(Config::default()).unwrap();
        let err = server
            .analyze_test_runs(Parameters(AnalyzeParams {
                plan_id: Some(1),
                suite_id: Some(2),
                min_roc: None,
                refresh: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert!(err.message.contains("not configured"));
        assert_eq!(server.cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_dropped_request_cancels_analysis() {
        let provider = Arc::new(MemoryProvider::new().stalled_suite_listing());
        let server = server(provider.clone());

        let call = tokio::spawn({
            let server = server.clone();
            async move {
                server
                    .analyze_test_runs(Parameters(AnalyzeParams {
                        plan_id: Some(5),
                        suite_id: Some(1),
                        min_roc: None,
                        refresh: None,
                    }))
                    .await
            }
        });
        provider.suite_listing_started().await;
        assert_eq!(provider.in_flight_calls(), 1);

        // client went away
        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());

        tokio::time::timeout(Duration::from_secs(5), async {
            while provider.in_flight_calls() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("in-flight upstream call was not dropped");
    }

    #[tokio::test]
    async fn test_resolve_suite_lists_cases() {
        let server = server(provider());
        let result = server
            .resolve_suite(Parameters(SuiteParams {
                plan_id: Some(5),
                suite_id: Some(1),
            }))
            .await
            .unwrap();
        let listing = text(&result);
        assert_eq!(listing["testCases"][0]["id"], 101);
        assert_eq!(listing["testCases"][0]["name"], "Login");
    }
}
