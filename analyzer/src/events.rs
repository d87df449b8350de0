//! Analysis progress events
//!
//! Events emitted while an analysis runs. A streamed analysis produces a
//! sequence of `Progress` events followed by exactly one terminal `Report`
//! or `Failed` event.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AnalysisError;
use crate::types::Report;

// ============================================================================
// Stages
// ============================================================================

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Suites,
    Runs,
    Filtering,
    Aggregation,
    Detection,
    Boundaries,
    Summary,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Suites => "Resolving suites",
            Stage::Runs => "Collecting runs",
            Stage::Filtering => "Filtering runs",
            Stage::Aggregation => "Aggregating daily totals",
            Stage::Detection => "Detecting release events",
            Stage::Boundaries => "Resolving event boundaries",
            Stage::Summary => "Assembling report",
        }
    }

    /// Percent range `[start, end)` this stage covers
    pub fn span(&self) -> (u8, u8) {
        match self {
            Stage::Suites => (0, 10),
            Stage::Runs => (10, 30),
            Stage::Filtering => (30, 55),
            Stage::Aggregation => (55, 60),
            Stage::Detection => (60, 65),
            Stage::Boundaries => (65, 95),
            Stage::Summary => (95, 100),
        }
    }

    /// Overall percent for `done` of `total` units inside this stage
    pub fn percent(&self, done: usize, total: usize) -> u8 {
        let (start, end) = self.span();
        if total == 0 {
            return start;
        }
        let fraction = done.min(total) as f64 / total as f64;
        start + ((end - start) as f64 * fraction).floor() as u8
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    /// A stage advanced
    Progress {
        stage: Stage,
        message: String,
        percent: u8,
        done: bool,
    },

    /// Final report (terminal)
    Report { report: Box<Report> },

    /// Analysis failed (terminal)
    Failed {
        message: String,
        /// The request itself was unusable (missing ids, unconfigured provider)
        #[serde(default)]
        configuration: bool,
    },
}

impl AnalysisEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnalysisEvent::Progress { .. })
    }
}

// ============================================================================
// Event Channel
// ============================================================================

pub type EventSender = mpsc::UnboundedSender<AnalysisEvent>;

pub type EventReceiver = mpsc::UnboundedReceiver<AnalysisEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Helper for sending events; percent never decreases across clones
#[derive(Clone, Default)]
pub struct ProgressSender {
    sender: Option<EventSender>,
    high_water: Arc<AtomicU8>,
}

impl ProgressSender {
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender: Some(sender),
            high_water: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Create a no-op sender (events are discarded)
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.sender.is_some()
    }

    fn send(&self, event: AnalysisEvent) {
        if let Some(ref sender) = self.sender {
            // Receiver may have gone away; analysis continues regardless
            let _ = sender.send(event);
        }
    }

    fn emit(&self, stage: Stage, message: String, percent: u8, done: bool) {
        let percent = percent.min(100);
        let previous = self.high_water.fetch_max(percent, Ordering::Relaxed);
        self.send(AnalysisEvent::Progress {
            stage,
            message,
            percent: previous.max(percent),
            done,
        });
    }

    /// Report `done` of `total` units inside a stage
    pub fn advance(&self, stage: Stage, message: impl Into<String>, done: usize, total: usize) {
        self.emit(stage, message.into(), stage.percent(done, total), false);
    }

    pub fn stage_started(&self, stage: Stage) {
        self.emit(stage, stage.name().to_string(), stage.span().0, false);
    }

    /// Mark a stage finished; `Summary` completion means 100%
    pub fn stage_finished(&self, stage: Stage, message: impl Into<String>) {
        let percent = if stage == Stage::Summary {
            100
        } else {
            stage.span().1
        };
        self.emit(stage, message.into(), percent, stage == Stage::Summary);
    }

    pub fn report(&self, report: Report) {
        self.send(AnalysisEvent::Report {
            report: Box::new(report),
        });
    }

    pub fn failed(&self, error: &AnalysisError) {
        self.send(AnalysisEvent::Failed {
            message: error.to_string(),
            configuration: error.is_configuration(),
        });
    }
}
