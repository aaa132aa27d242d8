use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, ErrorKind};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CyclePhase {
    #[default]
    Idle,
    Capturing,
    Analyzing,
    Succeeded,
    Failed,
}

/// What the presentation layer sees of the current or last cycle.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleSnapshot {
    pub phase: CyclePhase,
    pub cycle_id: Option<String>,
    pub question: Option<String>,
    /// Answer text, or `"Error: ..."` after a failure.
    pub response: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Last-started cycle owns the snapshot. Updates from a superseded cycle are
/// dropped and reported as not applied.
#[derive(Debug, Clone, Default)]
pub struct CycleState {
    snapshot: CycleSnapshot,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CycleSnapshot {
        self.snapshot.clone()
    }

    pub fn begin(&mut self, cycle_id: String, question: Option<String>, now: DateTime<Utc>) {
        self.snapshot = CycleSnapshot {
            phase: CyclePhase::Capturing,
            cycle_id: Some(cycle_id),
            question,
            response: None,
            error_kind: None,
            started_at: Some(now),
            finished_at: None,
        };
    }

    /// Failure with no capture attempted, e.g. a missing credential.
    pub fn begin_failed(
        &mut self,
        cycle_id: String,
        question: Option<String>,
        err: &AnalysisError,
        now: DateTime<Utc>,
    ) {
        self.snapshot = CycleSnapshot {
            phase: CyclePhase::Failed,
            cycle_id: Some(cycle_id),
            question,
            response: Some(err.display_text()),
            error_kind: Some(err.kind()),
            started_at: Some(now),
            finished_at: Some(now),
        };
    }

    pub fn analyzing(&mut self, cycle_id: &str) -> bool {
        if !self.owns(cycle_id) {
            return false;
        }
        self.snapshot.phase = CyclePhase::Analyzing;
        true
    }

    pub fn succeed(&mut self, cycle_id: &str, response: String, now: DateTime<Utc>) -> bool {
        if !self.owns(cycle_id) {
            return false;
        }
        self.snapshot.phase = CyclePhase::Succeeded;
        self.snapshot.response = Some(response);
        self.snapshot.error_kind = None;
        self.snapshot.finished_at = Some(now);
        true
    }

    pub fn fail(&mut self, cycle_id: &str, err: &AnalysisError, now: DateTime<Utc>) -> bool {
        if !self.owns(cycle_id) {
            return false;
        }
        self.snapshot.phase = CyclePhase::Failed;
        self.snapshot.response = Some(err.display_text());
        self.snapshot.error_kind = Some(err.kind());
        self.snapshot.finished_at = Some(now);
        true
    }

    /// Back to idle; the last response stays on display.
    pub fn settle(&mut self, cycle_id: &str) -> bool {
        if !self.owns(cycle_id) {
            return false;
        }
        self.snapshot.phase = CyclePhase::Idle;
        true
    }

    fn owns(&self, cycle_id: &str) -> bool {
        self.snapshot.cycle_id.as_deref() == Some(cycle_id)
    }
}
