//! Suite Resolver
//!
//! Expands a suite and all of its descendants into the expected set of test
//! case ids. Traversal is an explicit worklist over an id-indexed child map,
//! so deep hierarchies cannot exhaust the stack and a malformed (cyclic)
//! tree still terminates.

use std::collections::{BTreeSet, HashMap, HashSet};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, AnalysisResult};
use crate::fetch::Fetched;
use crate::pagination::collect_pages;
use crate::provider::TestDataProvider;
use crate::types::{PlanId, SuiteId, TestCase, TestCaseId, TestCaseRef, TestSuiteNode};

/// Name reported for ids without a loaded name
pub const UNKNOWN_NAME: &str = "Unknown";

/// Child lists of a plan's suites, indexed by parent id
#[derive(Debug, Default)]
pub struct SuiteTree {
    children: HashMap<SuiteId, Vec<SuiteId>>,
}

impl SuiteTree {
    pub fn from_nodes(nodes: &[TestSuiteNode]) -> Self {
        let mut children: HashMap<SuiteId, Vec<SuiteId>> = HashMap::new();
        for node in nodes {
            if let Some(parent) = node.parent_id {
                children.entry(parent).or_default().push(node.id);
            }
        }
        for list in children.values_mut() {
            list.sort_unstable();
            list.dedup();
        }
        Self { children }
    }

    /// `root` followed by every descendant, depth-first
    pub fn closure(&self, root: SuiteId) -> Vec<SuiteId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![root];

        while let Some(suite) = stack.pop() {
            if !visited.insert(suite) {
                continue;
            }
            order.push(suite);
            if let Some(children) = self.children.get(&suite) {
                // reversed so children are visited in ascending order
                stack.extend(children.iter().rev().copied());
            }
        }

        order
    }
}

/// The expected set: every test case reachable from the target suite
#[derive(Debug, Clone, Default)]
pub struct ExpectedTestCases {
    pub suite_ids: Vec<SuiteId>,
    pub ids: BTreeSet<TestCaseId>,
    pub names: HashMap<TestCaseId, String>,
    /// Suites whose test-case listing failed and contributed nothing
    pub failed_suites: Vec<SuiteId>,
}

impl ExpectedTestCases {
    /// Build directly from cases (first name wins on duplicates)
    pub fn from_cases<I: IntoIterator<Item = TestCase>>(cases: I) -> Self {
        let mut expected = Self::default();
        expected.extend(cases);
        expected
    }

    fn extend<I: IntoIterator<Item = TestCase>>(&mut self, cases: I) {
        for case in cases {
            self.ids.insert(case.id);
            self.names.entry(case.id).or_insert(case.name);
        }
    }

    pub fn contains(&self, id: TestCaseId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn name_of(&self, id: TestCaseId) -> &str {
        self.names.get(&id).map(String::as_str).unwrap_or(UNKNOWN_NAME)
    }

    pub fn to_ref(&self, id: TestCaseId) -> TestCaseRef {
        TestCaseRef {
            id,
            name: self.name_of(id).to_string(),
        }
    }

    /// Refs for `ids` in ascending id order
    pub fn refs<'a, I: IntoIterator<Item = &'a TestCaseId>>(&self, ids: I) -> Vec<TestCaseRef> {
        let sorted: BTreeSet<TestCaseId> = ids.into_iter().copied().collect();
        sorted.into_iter().map(|id| self.to_ref(id)).collect()
    }
}

/// Serializable view of a resolved suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteListing {
    pub plan_id: PlanId,
    pub suite_id: SuiteId,
    pub suite_ids: Vec<SuiteId>,
    pub failed_suites: Vec<SuiteId>,
    pub test_cases: Vec<TestCaseRef>,
}

impl ExpectedTestCases {
    pub fn listing(&self, plan_id: PlanId, suite_id: SuiteId) -> SuiteListing {
        SuiteListing {
            plan_id,
            suite_id,
            suite_ids: self.suite_ids.clone(),
            failed_suites: self.failed_suites.clone(),
            test_cases: self.refs(&self.ids),
        }
    }
}

/// Resolves a target suite into its expected test-case set
pub struct SuiteResolver<'a> {
    provider: &'a dyn TestDataProvider,
    batch_size: usize,
}

impl<'a> SuiteResolver<'a> {
    pub fn new(provider: &'a dyn TestDataProvider, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn resolve(
        &self,
        plan_id: PlanId,
        suite_id: SuiteId,
        cancel: &CancellationToken,
    ) -> AnalysisResult<ExpectedTestCases> {
        let nodes = match collect_pages(|token| self.provider.list_suites(plan_id, token)).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(plan_id, error = %e, "suite listing failed, resolving target suite only");
                Vec::new()
            }
        };

        let suite_ids = SuiteTree::from_nodes(&nodes).closure(suite_id);
        debug!(plan_id, suite_id, suites = suite_ids.len(), "suite closure computed");

        let mut expected = ExpectedTestCases {
            suite_ids: suite_ids.clone(),
            ..Default::default()
        };

        for batch in suite_ids.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }

            let fetched = join_all(batch.iter().map(|&id| async move {
                let cases: Fetched<Vec<TestCase>> = collect_pages(|token| {
                    self.provider.list_test_cases(plan_id, id, token)
                })
                .await
                .map_err(|e| warn!(suite_id = id, error = %e, "test case listing failed"))
                .into();
                (id, cases)
            }))
            .await;

            for (id, cases) in fetched {
                match cases {
                    Fetched::Present(cases) => expected.extend(cases),
                    Fetched::Absent => expected.failed_suites.push(id),
                }
            }
        }

        info!(
            plan_id,
            suite_id,
            suites = expected.suite_ids.len(),
            test_cases = expected.len(),
            failed_suites = expected.failed_suites.len(),
            "expected test cases resolved"
        );
        Ok(expected)
    }
}
