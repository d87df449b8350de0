//! Daily Aggregator
//!
//! Turns the filtered run list into a gap-free day-by-day signal, and keeps
//! the per-test-case execution dates used for whole-history coverage.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::suites::ExpectedTestCases;
use crate::types::{DayBucket, TestCaseId, TestResult, TestRun};

/// Sum `total_tests` per calendar day, filling every missing day between the
/// first and last observed day with zero
///
/// Runs without any timestamp are skipped. The output is strictly increasing
/// by date with consecutive days.
pub fn aggregate_daily<'a, I>(runs: I) -> Vec<DayBucket>
where
    I: IntoIterator<Item = &'a TestRun>,
{
    let mut totals: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for run in runs {
        if let Some(date) = run.activity_date() {
            *totals.entry(date).or_insert(0) += u64::from(run.total_tests);
        }
    }

    let (Some(&first), Some(&last)) = (totals.keys().next(), totals.keys().next_back()) else {
        return Vec::new();
    };

    first
        .iter_days()
        .take_while(|date| *date <= last)
        .map(|date| DayBucket {
            date,
            total_tests: totals.get(&date).copied().unwrap_or(0),
        })
        .collect()
}

/// Every day each expected test case was seen executing
///
/// A result's own completion day is used when present, otherwise the run's
/// activity day. Results for ids outside the expected set are ignored.
pub fn track_execution_dates<'a, I>(
    runs: I,
    expected: &ExpectedTestCases,
) -> BTreeMap<TestCaseId, BTreeSet<NaiveDate>>
where
    I: IntoIterator<Item = (&'a TestRun, &'a [TestResult])>,
{
    let mut dates: BTreeMap<TestCaseId, BTreeSet<NaiveDate>> = BTreeMap::new();
    for (run, results) in runs {
        let run_date = run.activity_date();
        for result in results {
            if !expected.contains(result.test_case_id) {
                continue;
            }
            let date = result.completed_date.map(|t| t.date_naive()).or(run_date);
            if let Some(date) = date {
                dates.entry(result.test_case_id).or_default().insert(date);
            }
        }
    }
    dates
}
