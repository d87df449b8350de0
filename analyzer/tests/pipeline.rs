//! End-to-end pipeline tests against the in-memory provider

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use testrun_analyzer::config::AnalysisConfig;
use testrun_analyzer::{
    AnalysisError, AnalysisEvent, AnalysisRequest, Analyzer, MemoryProvider, Outcome,
    RetryPolicy, TestResult, TestRun,
};
use tokio_util::sync::CancellationToken;

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).unwrap()
}

fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, month, day, hour, 0, 0).unwrap()
}

fn run(id: u32, name: &str, month: u32, day: u32, total_tests: u32) -> TestRun {
    TestRun {
        id,
        name: name.to_string(),
        started_date: Some(at(month, day, 11)),
        completed_date: Some(at(month, day, 12)),
        total_tests,
        state: Some("Completed".to_string()),
    }
}

fn result(test_case_id: u32, outcome: &str, completed: Option<DateTime<Utc>>) -> TestResult {
    TestResult {
        test_case_id,
        outcome: Outcome::from(outcome),
        completed_date: completed,
    }
}

/// Plan with suite 1 (cases 101, 102), child suite 2 (case 103) and an
/// unrelated suite 9 (case 555)
fn suites() -> MemoryProvider {
    MemoryProvider::new()
        .with_page_size(2)
        .with_suite(1, None)
        .with_suite(2, Some(1))
        .with_suite(9, None)
        .with_test_cases(1, [(101, "Login"), (102, "Checkout")])
        .with_test_cases(2, [(103, "Refund")])
        .with_test_cases(9, [(555, "Unrelated")])
}

/// Two release cycles: early March (spread over four days) and late May
fn release_history() -> MemoryProvider {
    suites()
        .with_run(
            run(1, "Release 1 regression", 3, 4, 1),
            vec![result(101, "Failed", Some(at(3, 4, 10)))],
        )
        .with_run(
            run(2, "Release 1 regression", 3, 5, 2),
            vec![
                result(101, "Passed", Some(at(3, 5, 10))),
                result(102, "Passed", None),
            ],
        )
        .with_run(
            run(3, "Release 1 mixed", 3, 5, 2),
            vec![result(102, "Passed", None), result(555, "Passed", None)],
        )
        .with_run(
            run(4, "nightly-dev-run", 3, 5, 50),
            vec![result(101, "Passed", None)],
        )
        .with_run(
            run(6, "Release 1 regression", 3, 7, 1),
            vec![result(103, "Passed", None)],
        )
        .with_run(
            run(5, "Release 2", 5, 20, 2),
            vec![result(101, "Passed", None), result(102, "Failed", None)],
        )
}

fn analyzer(provider: Arc<MemoryProvider>) -> Analyzer {
    Analyzer::new(provider, AnalysisConfig::default()).with_retry(RetryPolicy::none())
}

#[tokio::test]
async fn test_full_analysis() {
    let provider = Arc::new(release_history());
    let report = analyzer(provider.clone())
        .analyze(AnalysisRequest::new(10, 1).as_of(as_of()))
        .await
        .unwrap();

    assert_eq!(report.plan_id, 10);
    assert_eq!(report.suite_id, 1);
    assert_eq!(report.min_roc, 0);
    // runs 1, 2, 5 and 6; 3 is off-suite, 4 is denylisted
    assert_eq!(report.total_runs, 4);
    assert_eq!(report.run_stats.fetched, 6);
    assert_eq!(report.run_stats.excluded_by_name, 1);
    assert_eq!(report.run_stats.filtered_count, 1);
    assert_eq!(report.run_stats.retained, 4);

    let dates: Vec<NaiveDate> = report.monthly_runs.iter().map(|e| e.date).collect();
    assert_eq!(dates, vec![date(3, 5), date(5, 20)]);

    let march = &report.monthly_runs[0];
    assert_eq!(march.test_case_count, 3);
    assert_eq!(march.buffer_used, 2);
    assert!(march.fully_resolved);
    assert_eq!(
        march.found_test_cases.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![101, 102, 103]
    );
    assert_eq!(march.boundaries.start_date, Some(date(3, 4)));
    assert_eq!(march.boundaries.end_date, Some(date(3, 7)));
    assert_eq!(march.boundaries.duration_days, Some(3));

    let flaky: Vec<(u32, &str, u32)> = march
        .flaky_tests
        .iter()
        .map(|t| (t.id, t.name.as_str(), t.execution_count))
        .collect();
    assert_eq!(flaky, vec![(101, "Login", 2), (102, "Checkout", 2)]);

    // 101 failed first and passed later
    assert_eq!(march.pass_rates.total_tests_found, 3);
    assert_eq!(march.pass_rates.initial_passed_count, 2);
    assert_eq!(march.pass_rates.final_passed_count, 3);
    assert_eq!(march.pass_rates.initial_pass_rate, 66.67);
    assert_eq!(march.pass_rates.final_pass_rate, 100.0);
    assert_eq!(march.pass_rates.pass_rate_delta, 33.33);

    let may = &report.monthly_runs[1];
    assert_eq!(may.buffer_used, 5);
    assert!(!may.fully_resolved);
    assert_eq!(may.not_found_test_cases[0].id, 103);
    assert_eq!(may.not_found_test_cases[0].name, "Refund");
    assert_eq!(may.pass_rates.initial_pass_rate, 50.0);

    assert_eq!(report.overall_boundaries.start_date, Some(date(3, 4)));
    assert_eq!(report.overall_boundaries.end_date, Some(date(5, 20)));
    assert_eq!(report.test_case_summary.executed_count, 3);
    assert_eq!(report.test_case_summary.never_executed_count, 0);
}

/// Runs touching off-suite cases are kept out of the daily signal, yet the
/// same runs are still scanned when resolving event windows so their
/// off-suite ids get reported. The asymmetry is intentional.
#[tokio::test]
async fn test_off_suite_runs_excluded_from_signal_but_reported() {
    let provider = Arc::new(release_history());
    let report = analyzer(provider)
        .analyze(AnalysisRequest::new(10, 1).as_of(as_of()))
        .await
        .unwrap();

    let march = &report.monthly_runs[0];
    assert_eq!(
        march
            .off_suite_test_cases
            .iter()
            .map(|c| c.id)
            .collect::<Vec<_>>(),
        vec![555]
    );
    assert_ne!(march.off_suite_test_cases[0].name, "Unrelated");
    assert_eq!(report.run_stats.filtered_count, 1);
}

#[tokio::test]
async fn test_results_fetched_once_per_run() {
    let provider = Arc::new(release_history());
    let report = analyzer(provider.clone())
        .analyze(AnalysisRequest::new(10, 1).as_of(as_of()))
        .await
        .unwrap();

    for run_id in [1, 2, 3, 5, 6] {
        assert_eq!(provider.result_calls(run_id), 1, "run {}", run_id);
    }
    assert_eq!(provider.result_calls(4), 0);
    assert_eq!(report.fetch_stats.network_calls, 5);
    assert!(report.fetch_stats.cache_hits > 0);
}

#[tokio::test]
async fn test_flat_then_single_increase_yields_one_event() {
    // daily totals [0, 0, 5, 5, 0]
    let provider = Arc::new(
        suites()
            .with_run(run(1, "Regression", 4, 1, 0), vec![])
            .with_run(run(2, "Regression", 4, 2, 0), vec![])
            .with_run(
                run(3, "Regression", 4, 3, 5),
                vec![result(101, "Passed", None)],
            )
            .with_run(
                run(4, "Regression", 4, 4, 5),
                vec![result(102, "Passed", None)],
            )
            .with_run(run(5, "Regression", 4, 5, 0), vec![]),
    );
    let report = analyzer(provider)
        .analyze(AnalysisRequest::new(10, 1).as_of(as_of()))
        .await
        .unwrap();

    assert_eq!(report.monthly_runs.len(), 1);
    assert_eq!(report.monthly_runs[0].date, date(4, 3));
    assert_eq!(report.test_case_summary.never_executed_count, 1);
    assert_eq!(report.test_case_summary.never_executed[0].id, 103);
}

#[tokio::test]
async fn test_min_roc_override() {
    let provider = Arc::new(release_history());
    let report = analyzer(provider)
        .analyze(
            AnalysisRequest::new(10, 1)
                .with_min_roc(2)
                .as_of(as_of()),
        )
        .await
        .unwrap();

    // only the May jump (+2) clears the threshold
    assert_eq!(report.min_roc, 2);
    assert_eq!(report.monthly_runs.len(), 1);
    assert_eq!(report.monthly_runs[0].date, date(5, 20));
}

#[tokio::test]
async fn test_denylisted_run_never_counts() {
    let provider = Arc::new(
        suites().with_run(
            run(1, "nightly-dev-run", 4, 10, 500),
            vec![result(101, "Passed", None)],
        ),
    );
    let report = analyzer(provider.clone())
        .analyze(AnalysisRequest::new(10, 1).as_of(as_of()))
        .await
        .unwrap();

    assert_eq!(report.total_runs, 0);
    assert!(report.monthly_runs.is_empty());
    assert_eq!(report.test_case_summary.executed_count, 0);
    assert_eq!(provider.result_calls(1), 0);
}

#[tokio::test]
async fn test_failed_fetches_degrade_instead_of_failing() {
    let provider = Arc::new(release_history().failing_run(2).failing_suite(2));
    let report = analyzer(provider)
        .analyze(AnalysisRequest::new(10, 1).as_of(as_of()))
        .await
        .unwrap();

    assert_eq!(report.test_case_summary.total_expected, 2);
    assert_eq!(report.run_stats.failed_fetches, 1);
    assert_eq!(report.fetch_stats.failures, 1);
    // run 6 now touches 103, which is no longer expected
    assert_eq!(report.total_runs, 2);
}

#[tokio::test]
async fn test_missing_suite_id_is_rejected() {
    let provider = Arc::new(release_history());
    let err = analyzer(provider.clone())
        .analyze(AnalysisRequest {
            plan_id: Some(10),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::MissingSuiteId));
    assert_eq!(provider.run_list_calls(), 0);
}

#[tokio::test]
async fn test_cancelled_analysis_returns_no_report() {
    let provider = Arc::new(release_history());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = analyzer(provider.clone())
        .analyze_with(
            AnalysisRequest::new(10, 1).as_of(as_of()),
            &testrun_analyzer::ProgressSender::none(),
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(AnalysisError::Cancelled)));
    assert_eq!(provider.total_result_calls(), 0);
}

#[tokio::test]
async fn test_streamed_progress_ends_with_report() {
    let provider = Arc::new(release_history());
    let analyzer = Arc::new(analyzer(provider));
    let (handle, mut rx) = analyzer.analyze_streamed(
        AnalysisRequest::new(10, 1).as_of(as_of()),
        CancellationToken::new(),
    );

    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
    {
        events.push(event);
    }
    handle.await.unwrap();

    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            AnalysisEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100));

    let terminal: Vec<&AnalysisEvent> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    match events.last() {
        Some(AnalysisEvent::Report { report }) => assert_eq!(report.monthly_runs.len(), 2),
        other => panic!("expected report event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_analyses_are_isolated() {
    let provider = Arc::new(release_history());
    let analyzer = analyzer(provider);
    let request = AnalysisRequest::new(10, 1).as_of(as_of());

    let (first, second) = tokio::join!(
        analyzer.analyze(request.clone()),
        analyzer.analyze(request)
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.monthly_runs, second.monthly_runs);
    assert_eq!(first.run_stats, second.run_stats);
    assert_eq!(first.fetch_stats.network_calls, 5);
    assert_eq!(second.fetch_stats.network_calls, 5);
}
