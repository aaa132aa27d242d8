use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures that end an analysis cycle. These are the only errors the user
/// ever sees, rendered as plain response text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("No screen found: {0}")]
    NoScreenSource(String),
    #[error("No API key configured")]
    NoCredential,
    #[error("All models failed. Last error: {last}")]
    AllModelsFailed { last: String },
    #[error("An analysis is already in progress")]
    CycleInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NoScreenSource,
    NoCredential,
    AllModelsFailed,
    CycleInProgress,
    /// Diagnostic only; logged by the affinity guard and never surfaced.
    AffinityUnavailable,
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::NoScreenSource(_) => ErrorKind::NoScreenSource,
            AnalysisError::NoCredential => ErrorKind::NoCredential,
            AnalysisError::AllModelsFailed { .. } => ErrorKind::AllModelsFailed,
            AnalysisError::CycleInProgress => ErrorKind::CycleInProgress,
        }
    }

    /// Text shown in the response panel in place of an answer.
    pub fn display_text(&self) -> String {
        format!("Error: {self}")
    }
}
