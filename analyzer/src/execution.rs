//! Execution Analyzer
//!
//! Summarizes the executions inside one resolved event window: repeated
//! executions (flaky tests), off-suite executions, and first/last
//! execution pass rates.

use crate::boundary::{BoundaryResolution, Execution, ExecutionIndex};
use crate::suites::ExpectedTestCases;
use crate::types::{FlakyTest, PassRates, ReleaseEvent, TestCaseId, TestCaseRef};

/// Display name for off-suite ids, which are never looked up
pub const OFF_SUITE_NAME: &str = "(not in suite)";

/// Test cases executed more than once, by count descending then id
pub fn flaky_tests(index: &ExecutionIndex, expected: &ExpectedTestCases) -> Vec<FlakyTest> {
    let mut flaky: Vec<FlakyTest> = index
        .iter()
        .filter(|(_, record)| record.execution_count > 1)
        .map(|(&id, record)| FlakyTest {
            id,
            name: expected.name_of(id).to_string(),
            execution_count: record.execution_count,
        })
        .collect();
    flaky.sort_by(|a, b| {
        b.execution_count
            .cmp(&a.execution_count)
            .then(a.id.cmp(&b.id))
    });
    flaky
}

/// Off-suite ids, ascending, with placeholder names
pub fn off_suite_test_cases<'a, I>(ids: I) -> Vec<TestCaseRef>
where
    I: IntoIterator<Item = &'a TestCaseId>,
{
    let mut refs: Vec<TestCaseRef> = ids
        .into_iter()
        .map(|&id| TestCaseRef {
            id,
            name: OFF_SUITE_NAME.to_string(),
        })
        .collect();
    refs.sort_by_key(|r| r.id);
    refs
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(count as f64 * 100.0 / total as f64)
    }
}

/// Executions in chronological order; untimed executions last
fn chronological(executions: &[Execution]) -> Vec<&Execution> {
    let mut sorted: Vec<&Execution> = executions.iter().collect();
    // stable: untimed executions keep their scan order
    sorted.sort_by_key(|e| (e.completed_date.is_none(), e.completed_date));
    sorted
}

/// First-execution and last-execution pass rates over the found test cases
pub fn pass_rates<'a, I>(found: I, index: &ExecutionIndex) -> PassRates
where
    I: IntoIterator<Item = &'a TestCaseId>,
{
    let mut total = 0;
    let mut initial_passed = 0;
    let mut final_passed = 0;

    for id in found {
        let Some(record) = index.get(id) else {
            continue;
        };
        let ordered = chronological(&record.executions);
        let (Some(first), Some(last)) = (ordered.first(), ordered.last()) else {
            continue;
        };

        total += 1;
        if first.outcome.is_passed() {
            initial_passed += 1;
        }
        if last.outcome.is_passed() {
            final_passed += 1;
        }
    }

    let initial_pass_rate = percentage(initial_passed, total);
    let final_pass_rate = percentage(final_passed, total);
    PassRates {
        total_tests_found: total,
        initial_passed_count: initial_passed,
        final_passed_count: final_passed,
        initial_pass_rate,
        final_pass_rate,
        pass_rate_delta: round2(final_pass_rate - initial_pass_rate),
    }
}

/// Build the reported event from its resolved window
pub fn analyze_event(resolution: &BoundaryResolution, expected: &ExpectedTestCases) -> ReleaseEvent {
    let scan = &resolution.scan;
    ReleaseEvent {
        date: resolution.date,
        test_case_count: expected.len(),
        buffer_used: scan.buffer_days,
        fully_resolved: scan.is_complete(),
        found_test_cases: expected.refs(&scan.found),
        not_found_test_cases: expected.refs(&scan.not_found),
        off_suite_test_cases: off_suite_test_cases(&scan.off_suite),
        flaky_tests: flaky_tests(&scan.index, expected),
        pass_rates: pass_rates(&scan.found, &scan.index),
        boundaries: resolution.boundaries,
        runs_scanned: scan.runs_scanned,
    }
}
