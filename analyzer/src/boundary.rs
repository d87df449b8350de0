//! Boundary Resolver
//!
//! Widens a symmetric day window around a detected event date until the runs
//! inside it cover the whole expected set, or the maximum buffer is reached.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::{AnalysisError, AnalysisResult};
use crate::fetch::ResultFetcher;
use crate::suites::ExpectedTestCases;
use crate::types::{Boundaries, Outcome, TestCaseId, TestRun};

/// Runs indexed by their activity day
pub type RunsByDate = BTreeMap<NaiveDate, Vec<TestRun>>;

/// Index runs by activity day; undated runs are dropped
pub fn index_runs_by_date<'a, I>(runs: I) -> RunsByDate
where
    I: IntoIterator<Item = &'a TestRun>,
{
    let mut by_date = RunsByDate::new();
    for run in runs {
        if let Some(date) = run.activity_date() {
            by_date.entry(date).or_default().push(run.clone());
        }
    }
    by_date
}

/// One observed execution of a test case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub outcome: Outcome,
    /// Result completion time, else the run's activity time
    pub completed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub execution_count: u32,
    pub executions: Vec<Execution>,
}

/// Executions per test case inside one window, expected and off-suite alike
pub type ExecutionIndex = BTreeMap<TestCaseId, ExecutionRecord>;

/// Everything observed in one `[date - buffer, date + buffer]` window
#[derive(Debug, Clone, Default)]
pub struct WindowScan {
    pub buffer_days: u32,
    pub found: BTreeSet<TestCaseId>,
    pub not_found: BTreeSet<TestCaseId>,
    pub off_suite: BTreeSet<TestCaseId>,
    /// Days on which an expected test case executed
    pub execution_dates: BTreeSet<NaiveDate>,
    pub index: ExecutionIndex,
    pub runs_scanned: usize,
}

impl WindowScan {
    pub fn is_complete(&self) -> bool {
        self.not_found.is_empty()
    }

    /// Found plus off-suite ids
    pub fn all_executed(&self) -> BTreeSet<TestCaseId> {
        self.found.union(&self.off_suite).copied().collect()
    }
}

/// Final window chosen for one event
#[derive(Debug, Clone)]
pub struct BoundaryResolution {
    pub date: NaiveDate,
    pub scan: WindowScan,
    pub boundaries: Boundaries,
}

pub struct BoundaryResolver<'a> {
    fetcher: &'a ResultFetcher,
    runs_by_date: &'a RunsByDate,
    expected: &'a ExpectedTestCases,
    max_buffer_days: u32,
    batch_size: usize,
}

impl<'a> BoundaryResolver<'a> {
    pub fn new(
        fetcher: &'a ResultFetcher,
        runs_by_date: &'a RunsByDate,
        expected: &'a ExpectedTestCases,
        max_buffer_days: u32,
        batch_size: usize,
    ) -> Self {
        Self {
            fetcher,
            runs_by_date,
            expected,
            max_buffer_days,
            batch_size,
        }
    }

    /// Smallest buffer in `0..=max_buffer_days` that covers the expected set,
    /// else the widest scan
    #[instrument(skip(self, cancel), fields(max_buffer = self.max_buffer_days))]
    pub async fn resolve(
        &self,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> AnalysisResult<BoundaryResolution> {
        let mut scan = WindowScan::default();

        // every level is scanned in order; never skip one
        for buffer_days in 0..=self.max_buffer_days {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }

            scan = self.scan_window(date, buffer_days, cancel).await?;
            debug!(
                buffer_days,
                found = scan.found.len(),
                not_found = scan.not_found.len(),
                "window scanned"
            );
            if scan.is_complete() {
                break;
            }
        }

        let boundaries = Boundaries::from_dates(scan.execution_dates.iter().copied());
        Ok(BoundaryResolution {
            date,
            scan,
            boundaries,
        })
    }

    /// Scan every run in `[date - buffer_days, date + buffer_days]`
    pub async fn scan_window(
        &self,
        date: NaiveDate,
        buffer_days: u32,
        cancel: &CancellationToken,
    ) -> AnalysisResult<WindowScan> {
        let radius = Duration::days(i64::from(buffer_days));
        let runs: Vec<&TestRun> = self
            .runs_by_date
            .range(date - radius..=date + radius)
            .flat_map(|(_, runs)| runs.iter())
            .collect();

        let ids: Vec<_> = runs.iter().map(|run| run.id).collect();
        let fetched = self.fetcher.fetch_batched(&ids, self.batch_size, cancel).await?;

        let mut scan = WindowScan {
            buffer_days,
            runs_scanned: runs.len(),
            ..Default::default()
        };

        for (run, (_, results)) in runs.iter().zip(fetched) {
            let run_time = run.activity_time();
            for result in results.unwrap_or_default().iter() {
                let id = result.test_case_id;
                let completed_date = result.completed_date.or(run_time);

                let record = scan.index.entry(id).or_default();
                record.execution_count += 1;
                record.executions.push(Execution {
                    outcome: result.outcome.clone(),
                    completed_date,
                });

                if self.expected.contains(id) {
                    scan.found.insert(id);
                    if let Some(day) = completed_date.map(|t| t.date_naive()) {
                        scan.execution_dates.insert(day);
                    }
                } else {
                    scan.off_suite.insert(id);
                }
            }
        }

        scan.not_found = self.expected.ids.difference(&scan.found).copied().collect();
        Ok(scan)
    }
}
