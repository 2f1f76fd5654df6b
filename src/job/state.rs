use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, SubburnError};
use crate::media::Resolution;

/// Persisted lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Transcribed,
    Editing,
    Burning,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Transcribed => "transcribed",
            JobStatus::Editing => "editing",
            JobStatus::Burning => "burning",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Status reached by applying `event`, or `WrongState` for any pair not in
    /// the transition table
    pub fn transition(self, event: &JobEvent) -> Result<JobStatus> {
        use JobEvent::*;
        use JobStatus::*;

        let next = match (self, event) {
            (Pending, TranscriptionSucceeded { .. }) => Transcribed,
            (Pending, TranscriptionFailed { .. }) => Failed,
            (Transcribed | Editing, EditorOpened) => Editing,
            (Transcribed | Editing, BurnRequested { .. }) => Burning,
            (Burning, BurnSucceeded { .. }) => Completed,
            (Burning, BurnFailed { .. }) => Failed,
            _ => {
                return Err(SubburnError::WrongState(format!(
                    "cannot apply {} to a {} job",
                    event.name(),
                    self
                )));
            }
        };
        Ok(next)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event driving a job through its lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    TranscriptionSucceeded { subtitle_path: PathBuf },
    TranscriptionFailed { error: String },
    EditorOpened,
    BurnRequested { edited_subtitle_path: PathBuf, resolution: Resolution },
    BurnSucceeded { output_path: PathBuf },
    BurnFailed { error: String },
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::TranscriptionSucceeded { .. } => "transcription-succeeded",
            JobEvent::TranscriptionFailed { .. } => "transcription-failed",
            JobEvent::EditorOpened => "editor-opened",
            JobEvent::BurnRequested { .. } => "burn-requested",
            JobEvent::BurnSucceeded { .. } => "burn-succeeded",
            JobEvent::BurnFailed { .. } => "burn-failed",
        }
    }
}
