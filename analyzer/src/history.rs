//! Run History Collector
//!
//! Pages through a plan's runs one time window at a time, drops runs with
//! denylisted names, then applies the strict-subset purity filter: a run
//! whose results touch any test case outside the expected set is excluded
//! from the daily signal.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::events::{ProgressSender, Stage};
use crate::fetch::{Fetched, ResultFetcher};
use crate::pagination::collect_pages;
use crate::provider::TestDataProvider;
use crate::suites::ExpectedTestCases;
use crate::types::{PlanId, RunCollectionStats, TestRun};

/// Half-open `[start, end)` windows covering `history_days` back from `end`,
/// oldest first
pub fn history_windows(
    end: DateTime<Utc>,
    history_days: u32,
    window_days: u32,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let history_start = end - Duration::days(i64::from(history_days));
    let step = Duration::days(i64::from(window_days.max(1)));

    let mut windows = Vec::new();
    let mut start = history_start;
    while start < end {
        let window_end = (start + step).min(end);
        windows.push((start, window_end));
        start = window_end;
    }
    windows
}

/// Case-insensitive substring match against the denylist
pub fn is_denylisted(name: &str, denylist: &[String]) -> bool {
    let name = name.to_lowercase();
    denylist
        .iter()
        .filter(|entry| !entry.is_empty())
        .any(|entry| name.contains(&entry.to_lowercase()))
}

/// Collected run history
#[derive(Debug, Clone, Default)]
pub struct RunHistory {
    /// Every run that passed the name filter, sorted by activity time
    pub all_runs: Vec<TestRun>,
    /// Runs that also passed the strict-subset filter
    pub candidate_runs: Vec<TestRun>,
    pub stats: RunCollectionStats,
}

pub struct RunHistoryCollector<'a> {
    provider: &'a dyn TestDataProvider,
    fetcher: &'a ResultFetcher,
    settings: &'a AnalysisConfig,
    progress: &'a ProgressSender,
}

impl<'a> RunHistoryCollector<'a> {
    pub fn new(
        provider: &'a dyn TestDataProvider,
        fetcher: &'a ResultFetcher,
        settings: &'a AnalysisConfig,
        progress: &'a ProgressSender,
    ) -> Self {
        Self {
            provider,
            fetcher,
            settings,
            progress,
        }
    }

    /// Collect and filter the plan's runs in the history ending at `as_of`
    pub async fn collect(
        &self,
        plan_id: PlanId,
        expected: &ExpectedTestCases,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AnalysisResult<RunHistory> {
        let mut stats = RunCollectionStats::default();

        let listed = self.list_runs(plan_id, as_of, &mut stats, cancel).await?;
        stats.fetched = listed.len();

        let (mut all_runs, excluded): (Vec<TestRun>, Vec<TestRun>) = listed
            .into_iter()
            .partition(|run| !is_denylisted(&run.name, &self.settings.run_name_denylist));
        stats.excluded_by_name = excluded.len();
        all_runs.sort_by_key(|run| (run.activity_time(), run.id));

        debug!(
            kept = all_runs.len(),
            excluded = stats.excluded_by_name,
            "name denylist applied"
        );

        let candidate_runs = self.filter_runs(&all_runs, expected, &mut stats, cancel).await?;
        stats.retained = candidate_runs.len();

        info!(
            plan_id,
            fetched = stats.fetched,
            excluded_by_name = stats.excluded_by_name,
            filtered = stats.filtered_count,
            retained = stats.retained,
            "run history collected"
        );

        Ok(RunHistory {
            all_runs,
            candidate_runs,
            stats,
        })
    }

    async fn list_runs(
        &self,
        plan_id: PlanId,
        as_of: DateTime<Utc>,
        stats: &mut RunCollectionStats,
        cancel: &CancellationToken,
    ) -> AnalysisResult<Vec<TestRun>> {
        let windows = history_windows(
            as_of,
            self.settings.history_days,
            self.settings.window_days,
        );
        stats.windows = windows.len();

        let mut seen = HashSet::new();
        let mut runs = Vec::new();

        for (index, (start, end)) in windows.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }

            match collect_pages(|token| self.provider.list_runs(plan_id, *start, *end, token)).await
            {
                Ok(page) => {
                    // windows can overlap upstream (last-updated semantics)
                    runs.extend(page.into_iter().filter(|run| seen.insert(run.id)));
                }
                Err(e) => {
                    warn!(start = %start, end = %end, error = %e, "run window failed, skipping");
                    stats.failed_windows += 1;
                }
            }

            self.progress.advance(
                Stage::Runs,
                format!("Window {}/{}: {} runs so far", index + 1, windows.len(), runs.len()),
                index + 1,
                windows.len(),
            );
        }

        Ok(runs)
    }

    async fn filter_runs(
        &self,
        runs: &[TestRun],
        expected: &ExpectedTestCases,
        stats: &mut RunCollectionStats,
        cancel: &CancellationToken,
    ) -> AnalysisResult<Vec<TestRun>> {
        let batch_size = self.settings.batch_size.max(1);
        let mut retained = Vec::with_capacity(runs.len());

        for (index, batch) in runs.chunks(batch_size).enumerate() {
            let ids: Vec<_> = batch.iter().map(|run| run.id).collect();
            let fetched = self.fetcher.fetch_batched(&ids, batch_size, cancel).await?;

            for (run, (_, results)) in batch.iter().zip(fetched) {
                match results {
                    Fetched::Present(results) => {
                        if results.iter().all(|r| expected.contains(r.test_case_id)) {
                            retained.push(run.clone());
                        } else {
                            debug!(run_id = run.id, "run touches off-suite test cases, excluded");
                            stats.filtered_count += 1;
                        }
                    }
                    Fetched::Absent => {
                        stats.failed_fetches += 1;
                        stats.filtered_count += 1;
                    }
                }
            }

            let processed = (index * batch_size + batch.len()).min(runs.len());
            self.progress.advance(
                Stage::Filtering,
                format!("Checked {}/{} runs", processed, runs.len()),
                processed,
                runs.len(),
            );
        }

        Ok(retained)
    }
}
