//! Test-run boundary detection and flakiness analysis
//!
//! Scans a year of test-run history for one suite of a test plan, detects
//! release events from spikes in daily test volume, and resolves each event
//! into a window of runs with coverage, flakiness and pass-rate figures.
//!
//! ## Pipeline
//!
//! 1. **Suites**: the target suite and its descendants define the expected
//!    test cases ([`suites`])
//! 2. **Run history**: runs are listed in 7-day windows, filtered by name and
//!    by the strict-subset rule ([`history`])
//! 3. **Daily signal**: executed-test totals per day, gap-filled ([`daily`])
//! 4. **Change points**: day-over-day increases, clustered ([`changepoint`])
//! 5. **Boundaries**: smallest ±N-day window covering the expected set
//!    ([`boundary`]), summarized per event ([`execution`])
//! 6. **Report** ([`report`], rendered by [`reporter`])
//!
//! ## Usage
//!
//! ```rust,ignore
//! use testrun_analyzer::{AnalysisRequest, Analyzer, Config};
//!
//! let config = Config::load()?;
//! let analyzer = Analyzer::from_config(&config)?;
//! let report = analyzer.analyze(AnalysisRequest::new(42, 1337)).await?;
//! println!("{} release events", report.monthly_runs.len());
//! ```

pub mod boundary;
pub mod changepoint;
pub mod config;
pub mod daily;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod fetch;
pub mod history;
pub mod pagination;
pub mod provider;
pub mod report;
pub mod reporter;
pub mod suites;
pub mod telemetry;
pub mod types;

pub use config::Config;
pub use engine::{AnalysisRequest, Analyzer};
pub use error::{AnalysisError, AnalysisResult};
pub use events::{AnalysisEvent, EventReceiver, ProgressSender, Stage};
pub use fetch::{Fetched, RetryPolicy};
pub use provider::{AzureDevOpsProvider, MemoryProvider, TestDataProvider};
pub use reporter::{OutputFormat, Reporter};
pub use suites::{ExpectedTestCases, SuiteListing};
pub use types::*;
