//! Report Assembler

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};

use crate::suites::ExpectedTestCases;
use crate::types::{
    Boundaries, FetchStats, PlanId, ReleaseEvent, Report, RunCollectionStats, SuiteId,
    TestCaseId, TestCaseSummary,
};

pub type ExecutionDates = BTreeMap<TestCaseId, BTreeSet<NaiveDate>>;

/// Span of every expected-case execution across the whole history
pub fn overall_boundaries(dates: &ExecutionDates) -> Boundaries {
    Boundaries::from_dates(dates.values().flatten().copied())
}

/// Classify every expected id as executed at least once or never
pub fn test_case_summary(expected: &ExpectedTestCases, dates: &ExecutionDates) -> TestCaseSummary {
    let (executed, never_executed): (Vec<TestCaseId>, Vec<TestCaseId>) = expected
        .ids
        .iter()
        .copied()
        .partition(|id| dates.get(id).is_some_and(|days| !days.is_empty()));

    TestCaseSummary {
        total_expected: expected.len(),
        executed_count: executed.len(),
        never_executed_count: never_executed.len(),
        executed: expected.refs(&executed),
        never_executed: expected.refs(&never_executed),
    }
}

/// Inputs gathered by the pipeline, assembled into a [`Report`]
pub struct ReportParts<'a> {
    pub plan_id: PlanId,
    pub suite_id: SuiteId,
    pub min_roc: i64,
    pub total_runs: usize,
    pub expected: &'a ExpectedTestCases,
    pub execution_dates: &'a ExecutionDates,
    pub events: Vec<ReleaseEvent>,
    pub run_stats: RunCollectionStats,
    pub fetch_stats: FetchStats,
    pub generated_at: DateTime<Utc>,
}

impl ReportParts<'_> {
    pub fn assemble(self) -> Report {
        Report {
            plan_id: self.plan_id,
            suite_id: self.suite_id,
            total_runs: self.total_runs,
            min_roc: self.min_roc,
            overall_boundaries: overall_boundaries(self.execution_dates),
            test_case_summary: test_case_summary(self.expected, self.execution_dates),
            monthly_runs: self.events,
            run_stats: self.run_stats,
            fetch_stats: self.fetch_stats,
            generated_at: self.generated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TestCase;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    fn expected() -> ExpectedTestCases {
        ExpectedTestCases::from_cases((1..=3).map(|id| TestCase {
            id,
            name: format!("case {}", id),
        }))
    }

    #[test]
    fn test_summary_partitions_expected_set() {
        let dates = ExecutionDates::from([
            (1, BTreeSet::from([day(3), day(20)])),
            (3, BTreeSet::from([day(1)])),
        ]);
        let summary = test_case_summary(&expected(), &dates);

        assert_eq!(summary.total_expected, 3);
        assert_eq!(summary.executed_count, 2);
        assert_eq!(summary.never_executed_count, 1);
        assert_eq!(summary.never_executed[0].id, 2);
        assert_eq!(summary.executed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);

        let bounds = overall_boundaries(&dates);
        assert_eq!(bounds.start_date, Some(day(1)));
        assert_eq!(bounds.end_date, Some(day(20)));
        assert_eq!(bounds.duration_days, Some(19));
    }

    #[test]
    fn test_assemble_without_history() {
        let expected = expected();
        let dates = ExecutionDates::new();
        let report = ReportParts {
            plan_id: 4,
            suite_id: 8,
            min_roc: 0,
            total_runs: 0,
            expected: &expected,
            execution_dates: &dates,
            events: Vec::new(),
            run_stats: RunCollectionStats::default(),
            fetch_stats: FetchStats::default(),
            generated_at: Utc::now(),
        }
        .assemble();

        assert_eq!(report.overall_boundaries, Boundaries::default());
        assert_eq!(report.test_case_summary.never_executed_count, 3);
        assert!(report.monthly_runs.is_empty());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["planId"], 4);
        assert!(json["overallBoundaries"]["startDate"].is_null());
        assert!(json.get("monthlyRuns").is_some());
    }
}
