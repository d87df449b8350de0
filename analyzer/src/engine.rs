//! Analysis pipeline
//!
//! Wires the stages together for one request:
//!
//! ```text
//! suites -> run history -> daily signal -> change points -> boundaries -> report
//! ```
//!
//! Every request gets its own [`ResultFetcher`], so caches and counters are
//! never shared between concurrent analyses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::boundary::{index_runs_by_date, BoundaryResolver};
use crate::changepoint::ChangePointDetector;
use crate::config::{AnalysisConfig, Config};
use crate::daily::{aggregate_daily, track_execution_dates};
use crate::error::{AnalysisError, AnalysisResult};
use crate::events::{event_channel, EventReceiver, ProgressSender, Stage};
use crate::execution::analyze_event;
use crate::fetch::{ResultFetcher, RetryPolicy};
use crate::history::RunHistoryCollector;
use crate::provider::{AzureDevOpsProvider, TestDataProvider};
use crate::report::{ExecutionDates, ReportParts};
use crate::suites::{ExpectedTestCases, SuiteResolver};
use crate::types::{PlanId, Report, SuiteId, TestRun};

/// One analysis query
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub plan_id: Option<PlanId>,
    pub suite_id: Option<SuiteId>,
    /// Falls back to the configured threshold
    pub min_roc: Option<i64>,
    /// End of the history window; defaults to now
    pub as_of: Option<DateTime<Utc>>,
}

impl AnalysisRequest {
    pub fn new(plan_id: PlanId, suite_id: SuiteId) -> Self {
        Self {
            plan_id: Some(plan_id),
            suite_id: Some(suite_id),
            ..Default::default()
        }
    }

    pub fn with_min_roc(mut self, min_roc: i64) -> Self {
        self.min_roc = Some(min_roc);
        self
    }

    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    /// Plan and suite ids, rejecting missing or zero ids
    pub fn validate(&self) -> AnalysisResult<(PlanId, SuiteId)> {
        let plan_id = self
            .plan_id
            .filter(|&id| id != 0)
            .ok_or(AnalysisError::MissingPlanId)?;
        let suite_id = self
            .suite_id
            .filter(|&id| id != 0)
            .ok_or(AnalysisError::MissingSuiteId)?;
        Ok((plan_id, suite_id))
    }
}

/// Runs analyses against one data provider
pub struct Analyzer {
    provider: Arc<dyn TestDataProvider>,
    settings: AnalysisConfig,
    retry: RetryPolicy,
}

impl Analyzer {
    pub fn new(provider: Arc<dyn TestDataProvider>, settings: AnalysisConfig) -> Self {
        Self {
            provider,
            settings,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Analyzer backed by Azure DevOps
    pub fn from_config(config: &Config) -> AnalysisResult<Self> {
        let provider = AzureDevOpsProvider::new(config.azure.clone())?;
        Ok(Self::new(Arc::new(provider), config.analysis.clone()).with_retry(RetryPolicy::new(
            config.fetch.max_retries,
            config.fetch.backoff(),
        )))
    }

    pub fn settings(&self) -> &AnalysisConfig {
        &self.settings
    }

    /// Expected test cases of a suite and its descendants
    pub async fn resolve_suite(
        &self,
        plan_id: PlanId,
        suite_id: SuiteId,
    ) -> AnalysisResult<ExpectedTestCases> {
        let (plan_id, suite_id) = AnalysisRequest::new(plan_id, suite_id).validate()?;
        self.provider.ensure_ready()?;
        SuiteResolver::new(self.provider.as_ref(), self.settings.batch_size)
            .resolve(plan_id, suite_id, &CancellationToken::new())
            .await
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> AnalysisResult<Report> {
        self.analyze_with(request, &ProgressSender::none(), &CancellationToken::new())
            .await
    }

    /// Run the pipeline in a background task, streaming progress events
    /// followed by one terminal `Report` or `Failed` event
    pub fn analyze_streamed(
        self: Arc<Self>,
        request: AnalysisRequest,
        cancel: CancellationToken,
    ) -> (JoinHandle<()>, EventReceiver) {
        let (tx, rx) = event_channel();
        let handle = tokio::spawn(async move {
            let progress = ProgressSender::new(tx);
            // a cancelled token also drops any in-flight upstream call
            let outcome = tokio::select! {
                outcome = self.analyze_with(request, &progress, &cancel) => outcome,
                _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
            };
            match outcome {
                Ok(report) => progress.report(report),
                Err(e) => progress.failed(&e),
            }
        });
        (handle, rx)
    }

    #[instrument(skip(self, progress, cancel), fields(provider = self.provider.name()))]
    pub async fn analyze_with(
        &self,
        request: AnalysisRequest,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> AnalysisResult<Report> {
        let (plan_id, suite_id) = request.validate()?;
        self.provider.ensure_ready()?;
        let min_roc = request.min_roc.unwrap_or(self.settings.min_roc);
        let as_of = request.as_of.unwrap_or_else(Utc::now);
        let batch_size = self.settings.batch_size.max(1);
        let fetcher = ResultFetcher::new(self.provider.clone(), self.retry);

        info!(plan_id, suite_id, min_roc, "starting analysis");

        // Suites
        checkpoint(cancel)?;
        progress.stage_started(Stage::Suites);
        let expected = SuiteResolver::new(self.provider.as_ref(), batch_size)
            .resolve(plan_id, suite_id, cancel)
            .await?;
        if expected.is_empty() {
            warn!(plan_id, suite_id, "suite resolved to no test cases");
        }
        progress.stage_finished(
            Stage::Suites,
            format!(
                "{} test cases in {} suites",
                expected.len(),
                expected.suite_ids.len()
            ),
        );

        // Runs and filtering
        checkpoint(cancel)?;
        progress.stage_started(Stage::Runs);
        let history = RunHistoryCollector::new(self.provider.as_ref(), &fetcher, &self.settings, progress)
            .collect(plan_id, &expected, as_of, cancel)
            .await?;
        progress.stage_finished(
            Stage::Filtering,
            format!(
                "{} of {} runs contribute to the daily signal",
                history.stats.retained, history.stats.fetched
            ),
        );

        // Daily signal and whole-history coverage
        checkpoint(cancel)?;
        progress.stage_started(Stage::Aggregation);
        let buckets = aggregate_daily(&history.candidate_runs);
        let execution_dates = self
            .execution_dates(&history.all_runs, &expected, &fetcher, batch_size, cancel)
            .await?;
        progress.stage_finished(
            Stage::Aggregation,
            format!("{} days of history", buckets.len()),
        );

        // Change points
        checkpoint(cancel)?;
        progress.stage_started(Stage::Detection);
        let dates = ChangePointDetector::new(min_roc, self.settings.cluster_window_days).detect(&buckets);
        progress.stage_finished(
            Stage::Detection,
            format!("{} release events detected", dates.len()),
        );

        // Boundaries, one event at a time
        checkpoint(cancel)?;
        progress.stage_started(Stage::Boundaries);
        let runs_by_date = index_runs_by_date(&history.all_runs);
        let resolver = BoundaryResolver::new(
            &fetcher,
            &runs_by_date,
            &expected,
            self.settings.max_buffer_days,
            batch_size,
        );

        let mut events = Vec::with_capacity(dates.len());
        for (index, date) in dates.iter().enumerate() {
            let resolution = resolver.resolve(*date, cancel).await?;
            let event = analyze_event(&resolution, &expected);
            progress.advance(
                Stage::Boundaries,
                format!(
                    "Event {}/{} on {}: {}/{} test cases found (buffer {}d)",
                    index + 1,
                    dates.len(),
                    date,
                    event.found_test_cases.len(),
                    event.test_case_count,
                    event.buffer_used
                ),
                index + 1,
                dates.len(),
            );
            events.push(event);
        }
        progress.stage_finished(Stage::Boundaries, format!("{} events resolved", events.len()));

        // Report
        checkpoint(cancel)?;
        let report = ReportParts {
            plan_id,
            suite_id,
            min_roc,
            total_runs: history.candidate_runs.len(),
            expected: &expected,
            execution_dates: &execution_dates,
            events,
            run_stats: history.stats,
            fetch_stats: fetcher.stats(),
            generated_at: Utc::now(),
        }
        .assemble();
        progress.stage_finished(Stage::Summary, "Analysis complete");

        info!(
            plan_id,
            suite_id,
            events = report.monthly_runs.len(),
            total_runs = report.total_runs,
            network_calls = report.fetch_stats.network_calls,
            "analysis complete"
        );
        Ok(report)
    }

    /// Execution days per expected test case over every name-filtered run
    async fn execution_dates(
        &self,
        runs: &[TestRun],
        expected: &ExpectedTestCases,
        fetcher: &ResultFetcher,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> AnalysisResult<ExecutionDates> {
        let ids: Vec<_> = runs.iter().map(|run| run.id).collect();
        let fetched = fetcher.fetch_batched(&ids, batch_size, cancel).await?;
        let results: Vec<_> = fetched
            .into_iter()
            .map(|(_, results)| results.unwrap_or_default())
            .collect();

        Ok(track_execution_dates(
            runs.iter()
                .zip(results.iter())
                .map(|(run, results)| (run, results.as_slice())),
            expected,
        ))
    }
}

fn checkpoint(cancel: &CancellationToken) -> AnalysisResult<()> {
    if cancel.is_cancelled() {
        Err(AnalysisError::Cancelled)
    } else {
        Ok(())
    }
}
