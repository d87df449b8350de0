//! In-memory provider
//!
//! Serves a fixed history from memory with the same paging contract as the
//! REST provider. Used by tests and for replaying exported histories.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::error::{ProviderError, ProviderResult};
use super::{Page, TestDataProvider};
use crate::types::{PlanId, RunId, SuiteId, TestCase, TestResult, TestRun, TestSuiteNode};

/// Provider backed by in-memory fixtures
#[derive(Default)]
pub struct MemoryProvider {
    suites: Vec<TestSuiteNode>,
    test_cases: HashMap<SuiteId, Vec<TestCase>>,
    runs: Vec<TestRun>,
    results: HashMap<RunId, Vec<TestResult>>,
    failing_suites: HashSet<SuiteId>,
    failing_runs: HashSet<RunId>,
    transient_failures: Mutex<HashMap<RunId, usize>>,
    fail_suite_listing: bool,
    stall_suite_listing: bool,
    suite_listing_started: Notify,
    in_flight: AtomicUsize,
    page_size: Option<usize>,
    result_calls: Mutex<HashMap<RunId, usize>>,
    run_list_calls: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split every listing into pages of `size` items
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    pub fn with_suite(mut self, id: SuiteId, parent_id: Option<SuiteId>) -> Self {
        self.suites.push(TestSuiteNode {
            id,
            parent_id,
            name: Some(format!("Suite {}", id)),
        });
        self
    }

    pub fn with_test_cases<I>(mut self, suite_id: SuiteId, cases: I) -> Self
    where
        I: IntoIterator<Item = (u32, &'static str)>,
    {
        self.test_cases.entry(suite_id).or_default().extend(
            cases
                .into_iter()
                .map(|(id, name)| TestCase {
                    id,
                    name: name.to_string(),
                }),
        );
        self
    }

    pub fn with_run(mut self, run: TestRun, results: Vec<TestResult>) -> Self {
        self.results.insert(run.id, results);
        self.runs.push(run);
        self
    }

    /// Make result fetches for `run_id` fail
    pub fn failing_run(mut self, run_id: RunId) -> Self {
        self.failing_runs.insert(run_id);
        self
    }

    /// Make the first `failures` result fetches for `run_id` fail with a 503
    pub fn flaky_run(mut self, run_id: RunId, failures: usize) -> Self {
        self.transient_failures.get_mut().insert(run_id, failures);
        self
    }

    /// Make test-case fetches for `suite_id` fail
    pub fn failing_suite(mut self, suite_id: SuiteId) -> Self {
        self.failing_suites.insert(suite_id);
        self
    }

    /// Make suite listing fail
    pub fn failing_suite_listing(mut self) -> Self {
        self.fail_suite_listing = true;
        self
    }

    /// Make suite listing hang until the caller drops it
    pub fn stalled_suite_listing(mut self) -> Self {
        self.stall_suite_listing = true;
        self
    }

    /// Resolves once a stalled suite listing has been entered
    pub async fn suite_listing_started(&self) {
        self.suite_listing_started.notified().await
    }

    /// Stalled calls that have not been dropped yet
    pub fn in_flight_calls(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of `list_results` calls made for a run (all pages)
    pub fn result_calls(&self, run_id: RunId) -> usize {
        self.result_calls.lock().get(&run_id).copied().unwrap_or(0)
    }

    /// Total `list_results` calls across runs
    pub fn total_result_calls(&self) -> usize {
        self.result_calls.lock().values().sum()
    }

    pub fn run_list_calls(&self) -> usize {
        self.run_list_calls.load(Ordering::Relaxed)
    }

    fn paginate<T: Clone>(&self, items: &[T], continuation: Option<String>) -> ProviderResult<Page<T>> {
        let offset: usize = match continuation {
            Some(token) => token
                .parse()
                .map_err(|_| ProviderError::Unavailable(format!("bad token {}", token)))?,
            None => 0,
        };
        let size = self.page_size.unwrap_or(usize::MAX);
        let end = offset.saturating_add(size).min(items.len());
        let page = items.get(offset..end).unwrap_or_default().to_vec();
        let continuation_token = (end < items.len()).then(|| end.to_string());
        Ok(Page {
            items: page,
            continuation_token,
        })
    }
}

/// Counts a call as in flight until dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TestDataProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_suites(
        &self,
        _plan_id: PlanId,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestSuiteNode>> {
        if self.fail_suite_listing {
            return Err(ProviderError::Unavailable("suite listing".into()));
        }
        if self.stall_suite_listing {
            let _in_flight = InFlight::enter(&self.in_flight);
            self.suite_listing_started.notify_one();
            return std::future::pending().await;
        }
        self.paginate(&self.suites, continuation)
    }

    async fn list_test_cases(
        &self,
        _plan_id: PlanId,
        suite_id: SuiteId,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestCase>> {
        if self.failing_suites.contains(&suite_id) {
            return Err(ProviderError::Status {
                status: 500,
                body: format!("suite {} unavailable", suite_id),
            });
        }
        let cases = self.test_cases.get(&suite_id).map(Vec::as_slice).unwrap_or(&[]);
        self.paginate(cases, continuation)
    }

    async fn list_runs(
        &self,
        _plan_id: PlanId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestRun>> {
        self.run_list_calls.fetch_add(1, Ordering::Relaxed);
        let in_window: Vec<TestRun> = self
            .runs
            .iter()
            .filter(|run| {
                run.activity_time()
                    .map(|t| t >= start && t < end)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        self.paginate(&in_window, continuation)
    }

    async fn list_results(
        &self,
        run_id: RunId,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestResult>> {
        *self.result_calls.lock().entry(run_id).or_insert(0) += 1;
        if self.failing_runs.contains(&run_id) {
            return Err(ProviderError::Status {
                status: 404,
                body: format!("run {} not found", run_id),
            });
        }
        if let Some(remaining) = self
            .transient_failures
            .lock()
            .get_mut(&run_id)
            .filter(|remaining| **remaining > 0)
        {
            *remaining -= 1;
            return Err(ProviderError::Status {
                status: 503,
                body: format!("run {} temporarily unavailable", run_id),
            });
        }
        let results = self.results.get(&run_id).map(Vec::as_slice).unwrap_or(&[]);
        self.paginate(results, continuation)
    }
}
