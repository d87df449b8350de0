//! Result Fetcher
//!
//! Fetches per-run results with bounded retries and memoizes them for the
//! lifetime of one analysis pass, so every stage that needs a run's results
//! shares a single upstream request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AnalysisError, AnalysisResult};
use crate::pagination::collect_pages;
use crate::provider::TestDataProvider;
use crate::types::{FetchStats, RunId, TestResult};

/// Outcome of fetching one unit (one run, one suite)
///
/// Upstream failures never propagate past the unit: they become `Absent`.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Present(T),
    Absent,
}

impl<T> Fetched<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Fetched::Absent)
    }

    pub fn present(self) -> Option<T> {
        match self {
            Fetched::Present(value) => Some(value),
            Fetched::Absent => None,
        }
    }

    pub fn as_ref(&self) -> Fetched<&T> {
        match self {
            Fetched::Present(value) => Fetched::Present(value),
            Fetched::Absent => Fetched::Absent,
        }
    }

    /// Treat an absent unit as empty
    pub fn unwrap_or_default(self) -> T
    where
        T: Default,
    {
        self.present().unwrap_or_default()
    }
}

impl<T, E> From<Result<T, E>> for Fetched<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Fetched::Present(value),
            Err(_) => Fetched::Absent,
        }
    }
}

/// Exponential backoff: `backoff * 2^attempt`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(250))
    }
}

/// Shared, immutable result list of one run
pub type RunResults = Arc<Vec<TestResult>>;

/// Memoizing per-run result fetcher
///
/// The cache is write-once per run id; concurrent readers see either no
/// entry or the final one.
pub struct ResultFetcher {
    provider: Arc<dyn TestDataProvider>,
    retry: RetryPolicy,
    cache: RwLock<HashMap<RunId, Fetched<RunResults>>>,
    network_calls: AtomicUsize,
    cache_hits: AtomicUsize,
    failures: AtomicUsize,
}

impl ResultFetcher {
    pub fn new(provider: Arc<dyn TestDataProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            cache: RwLock::new(HashMap::new()),
            network_calls: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Results of one run, fetched at most once per pass
    pub async fn fetch(&self, run_id: RunId) -> Fetched<RunResults> {
        if let Some(hit) = self.cache.read().await.get(&run_id) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return hit.clone();
        }

        let fetched = self.fetch_uncached(run_id).await;
        self.cache
            .write()
            .await
            .entry(run_id)
            .or_insert(fetched)
            .clone()
    }

    /// Results of one run; an absent run reads as no results
    pub async fn results(&self, run_id: RunId) -> RunResults {
        self.fetch(run_id).await.unwrap_or_default()
    }

    /// Fetch many runs in fixed-size concurrent batches
    ///
    /// A batch starts only after the previous one has fully resolved.
    /// Output order matches `run_ids`.
    pub async fn fetch_batched(
        &self,
        run_ids: &[RunId],
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> AnalysisResult<Vec<(RunId, Fetched<RunResults>)>> {
        let mut fetched = Vec::with_capacity(run_ids.len());

        for (index, batch) in run_ids.chunks(batch_size.max(1)).enumerate() {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }

            debug!(batch = index, size = batch.len(), "fetching result batch");
            let results = join_all(
                batch
                    .iter()
                    .map(|&run_id| async move { (run_id, self.fetch(run_id).await) }),
            )
            .await;
            fetched.extend(results);
        }

        Ok(fetched)
    }

    async fn fetch_uncached(&self, run_id: RunId) -> Fetched<RunResults> {
        let mut attempt = 0;
        loop {
            self.network_calls.fetch_add(1, Ordering::Relaxed);
            match collect_pages(|token| self.provider.list_results(run_id, token)).await {
                Ok(results) => return Fetched::Present(Arc::new(results)),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    debug!(run_id, attempt, error = %e, ?delay, "retrying result fetch");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(run_id, error = %e, "result fetch failed, treating run as absent");
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    return Fetched::Absent;
                }
            }
        }
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            network_calls: self.network_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;
    use crate::types::{Outcome, TestRun};

    fn run(id: RunId) -> TestRun {
        TestRun {
            id,
            name: format!("run {}", id),
            started_date: None,
            completed_date: None,
            total_tests: 1,
            state: None,
        }
    }

    fn passed(test_case_id: u32) -> TestResult {
        TestResult {
            test_case_id,
            outcome: Outcome::Passed,
            completed_date: None,
        }
    }

    #[test]
    fn test_fetched_helpers() {
        let present: Fetched<Vec<u32>> = Fetched::Present(vec![1]);
        assert!(!present.is_absent());
        assert_eq!(present.as_ref().present(), Some(&vec![1]));

        let absent: Fetched<Vec<u32>> = Err::<Vec<u32>, ()>(()).into();
        assert!(absent.is_absent());
        assert!(absent.unwrap_or_default().is_empty());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_fetch_is_memoized() {
        let provider = Arc::new(MemoryProvider::new().with_run(run(1), vec![passed(101)]));
        let fetcher = ResultFetcher::new(provider.clone(), RetryPolicy::none());

        let first = fetcher.results(1).await;
        let second = fetcher.results(1).await;

        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.result_calls(1), 1);
        let stats = fetcher.stats();
        assert_eq!(stats.network_calls, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        // 404 is not retryable; MemoryProvider uses 404 for failing runs
        let provider = Arc::new(MemoryProvider::new().failing_run(7));
        let fetcher = ResultFetcher::new(
            provider.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        assert!(fetcher.fetch(7).await.is_absent());
        assert!(fetcher.results(7).await.is_empty());
        assert_eq!(provider.result_calls(7), 1);
        assert_eq!(fetcher.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let provider = Arc::new(
            MemoryProvider::new()
                .with_run(run(3), vec![passed(101)])
                .flaky_run(3, 1),
        );
        let fetcher = ResultFetcher::new(
            provider.clone(),
            RetryPolicy::new(2, Duration::from_millis(1)),
        );

        let fetched = fetcher.fetch(3).await;
        assert_eq!(fetched.present().map(|r| r.len()), Some(1));
        assert_eq!(provider.result_calls(3), 2);
        let stats = fetcher.stats();
        assert_eq!(stats.network_calls, 2);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let provider = Arc::new(
            MemoryProvider::new()
                .with_run(run(5), vec![passed(101)])
                .flaky_run(5, 10),
        );
        let fetcher = ResultFetcher::new(
            provider.clone(),
            RetryPolicy::new(2, Duration::from_millis(1)),
        );

        assert!(fetcher.fetch(5).await.is_absent());
        // first attempt plus max_retries
        assert_eq!(provider.result_calls(5), 3);
        assert_eq!(fetcher.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_batched_preserves_order_and_cancels() {
        let provider = Arc::new(
            MemoryProvider::new()
                .with_run(run(1), vec![passed(1)])
                .with_run(run(2), vec![passed(2), passed(3)])
                .with_run(run(3), vec![]),
        );
        let fetcher = ResultFetcher::new(provider, RetryPolicy::none());
        let cancel = CancellationToken::new();

        let fetched = fetcher.fetch_batched(&[3, 1, 2], 2, &cancel).await.unwrap();
        let ids: Vec<RunId> = fetched.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(fetched[2].1.as_ref().present().map(|r| r.len()), Some(2));

        cancel.cancel();
        assert!(matches!(
            fetcher.fetch_batched(&[1], 2, &cancel).await,
            Err(AnalysisError::Cancelled)
        ));
    }
}
