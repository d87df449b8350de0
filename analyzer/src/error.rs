//! Request-level errors
//!
//! Only configuration problems and cancellation fail an analysis. Upstream
//! failures for individual suites and runs are absorbed where they happen
//! and show up as reduced coverage in the report.

use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("plan id is required")]
    MissingPlanId,

    #[error("suite id is required")]
    MissingSuiteId,

    #[error("analysis cancelled")]
    Cancelled,

    /// The provider cannot serve any request (e.g. not configured)
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl AnalysisError {
    /// Configuration errors are the caller's fault
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AnalysisError::MissingPlanId
                | AnalysisError::MissingSuiteId
                | AnalysisError::Provider(ProviderError::NotConfigured(_))
        )
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
