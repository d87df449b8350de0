//! Data model for test-run analysis
//!
//! Upstream records (suites, cases, runs, results) are produced by a
//! [`TestDataProvider`](crate::provider::TestDataProvider); everything else
//! is derived by the pipeline and serialized into the final [`Report`].

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type PlanId = u32;
pub type SuiteId = u32;
pub type RunId = u32;
pub type TestCaseId = u32;

// ============================================================================
// Upstream records
// ============================================================================

/// A node in a test plan's suite tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteNode {
    pub id: SuiteId,
    #[serde(default)]
    pub parent_id: Option<SuiteId>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A unit of expected coverage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: TestCaseId,
    pub name: String,
}

/// One executed test run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub id: RunId,
    pub name: String,
    #[serde(default)]
    pub started_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_tests: u32,
    #[serde(default)]
    pub state: Option<String>,
}

impl TestRun {
    /// Timestamp the run is attributed to: completion, else start
    pub fn activity_time(&self) -> Option<DateTime<Utc>> {
        self.completed_date.or(self.started_date)
    }

    /// Calendar day (UTC) the run is attributed to
    pub fn activity_date(&self) -> Option<NaiveDate> {
        self.activity_time().map(|t| t.date_naive())
    }
}

/// Outcome of one test case within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Outcome {
    Passed,
    Failed,
    Other(String),
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }
}

impl From<String> for Outcome {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("passed") {
            Outcome::Passed
        } else if value.eq_ignore_ascii_case("failed") {
            Outcome::Failed
        } else {
            Outcome::Other(value)
        }
    }
}

impl From<&str> for Outcome {
    fn from(value: &str) -> Self {
        Outcome::from(value.to_string())
    }
}

impl From<Outcome> for String {
    fn from(value: Outcome) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => write!(f, "Passed"),
            Outcome::Failed => write!(f, "Failed"),
            Outcome::Other(other) => write!(f, "{}", other),
        }
    }
}

/// One test case's outcome within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_case_id: TestCaseId,
    pub outcome: Outcome,
    #[serde(default)]
    pub completed_date: Option<DateTime<Utc>>,
}

// ============================================================================
// Derived series
// ============================================================================

/// Summed `total_tests` for one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    pub date: NaiveDate,
    pub total_tests: u64,
}

// ============================================================================
// Report types
// ============================================================================

/// A test case id with its display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseRef {
    pub id: TestCaseId,
    pub name: String,
}

/// A test case executed more than once inside one event window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlakyTest {
    pub id: TestCaseId,
    pub name: String,
    pub execution_count: u32,
}

/// First-execution vs last-execution pass rates for an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassRates {
    pub total_tests_found: usize,
    pub initial_passed_count: usize,
    pub final_passed_count: usize,
    /// Percentage in [0, 100], two decimals
    pub initial_pass_rate: f64,
    /// Percentage in [0, 100], two decimals
    pub final_pass_rate: f64,
    /// `final_pass_rate - initial_pass_rate`, two decimals
    pub pass_rate_delta: f64,
}

/// Actual first/last execution day of a set of executions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Boundaries {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration_days: Option<i64>,
}

impl Boundaries {
    /// Min/max over the given days; all fields are `None` for an empty input
    pub fn from_dates<I: IntoIterator<Item = NaiveDate>>(dates: I) -> Self {
        let mut bounds: Option<(NaiveDate, NaiveDate)> = None;
        for date in dates {
            bounds = Some(match bounds {
                None => (date, date),
                Some((start, end)) => (start.min(date), end.max(date)),
            });
        }

        match bounds {
            Some((start, end)) => Self {
                start_date: Some(start),
                end_date: Some(end),
                duration_days: Some((end - start).num_days()),
            },
            None => Self::default(),
        }
    }
}

/// One detected release event with its resolved window and quality summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseEvent {
    pub date: NaiveDate,
    /// Size of the expected set
    pub test_case_count: usize,
    pub buffer_used: u32,
    pub fully_resolved: bool,
    pub found_test_cases: Vec<TestCaseRef>,
    pub not_found_test_cases: Vec<TestCaseRef>,
    pub off_suite_test_cases: Vec<TestCaseRef>,
    pub flaky_tests: Vec<FlakyTest>,
    pub pass_rates: PassRates,
    pub boundaries: Boundaries,
    pub runs_scanned: usize,
}

/// Whole-history coverage of the expected set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseSummary {
    pub total_expected: usize,
    pub executed_count: usize,
    pub never_executed_count: usize,
    pub executed: Vec<TestCaseRef>,
    pub never_executed: Vec<TestCaseRef>,
}

/// Request-local counters for run collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCollectionStats {
    pub windows: usize,
    pub failed_windows: usize,
    pub fetched: usize,
    pub excluded_by_name: usize,
    /// Runs dropped by the strict-subset filter, including failed fetches
    pub filtered_count: usize,
    pub failed_fetches: usize,
    pub retained: usize,
}

/// Result Fetcher counters for one analysis pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchStats {
    pub network_calls: usize,
    pub cache_hits: usize,
    pub failures: usize,
}

/// Final analysis output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub plan_id: PlanId,
    pub suite_id: SuiteId,
    /// Runs contributing to the daily signal
    pub total_runs: usize,
    pub min_roc: i64,
    pub overall_boundaries: Boundaries,
    pub test_case_summary: TestCaseSummary,
    pub monthly_runs: Vec<ReleaseEvent>,
    pub run_stats: RunCollectionStats,
    pub fetch_stats: FetchStats,
    pub generated_at: DateTime<Utc>,
}
