//! Test execution data providers
//!
//! The engine reads suites, test cases, runs and results through the
//! [`TestDataProvider`] trait. Every operation returns one page at a time;
//! callers drain pages with [`crate::pagination`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{PlanId, RunId, SuiteId, TestCase, TestResult, TestRun, TestSuiteNode};

pub mod azure;
pub mod error;
pub mod memory;

pub use azure::AzureDevOpsProvider;
pub use error::{ProviderError, ProviderResult};
pub use memory::MemoryProvider;

/// One page of items plus the token for the next page
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continuation_token: Option<String>,
}

impl<T> Page<T> {
    /// A final page (no continuation)
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            continuation_token: None,
        }
    }

    pub fn with_token(items: Vec<T>, token: impl Into<String>) -> Self {
        Self {
            items,
            continuation_token: Some(token.into()),
        }
    }
}

/// Trait for test execution data sources
///
/// Implementations must be cheap to share across concurrent fetches.
/// `continuation` is `None` for the first page and the previous page's
/// token afterwards.
#[async_trait]
pub trait TestDataProvider: Send + Sync {
    /// Get the name of this provider
    fn name(&self) -> &str;

    /// Fail fast when the provider cannot serve any request
    fn ensure_ready(&self) -> ProviderResult<()> {
        Ok(())
    }

    /// List every suite node of a plan
    async fn list_suites(
        &self,
        plan_id: PlanId,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestSuiteNode>>;

    /// List the test cases directly attached to one suite
    async fn list_test_cases(
        &self,
        plan_id: PlanId,
        suite_id: SuiteId,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestCase>>;

    /// List runs of a plan active in `[start, end)`
    async fn list_runs(
        &self,
        plan_id: PlanId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestRun>>;

    /// List the results of one run
    async fn list_results(
        &self,
        run_id: RunId,
        continuation: Option<String>,
    ) -> ProviderResult<Page<TestResult>>;
}
