use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{JobEvent, JobId, JobStatus, OwnerId};
use crate::error::Result;
use crate::media::Resolution;

/// Persisted state of one submitted video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub owner: OwnerId,
    pub original_video_path: PathBuf,
    pub generated_subtitle_path: Option<PathBuf>,
    pub edited_subtitle_path: Option<PathBuf>,
    pub output_video_path: Option<PathBuf>,
    pub original_filename: String,
    pub status: JobStatus,
    pub resolution: Resolution,
    pub language: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        owner: OwnerId,
        original_video_path: PathBuf,
        original_filename: String,
        resolution: Resolution,
        language: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner,
            original_video_path,
            generated_subtitle_path: None,
            edited_subtitle_path: None,
            output_video_path: None,
            original_filename,
            status: JobStatus::Pending,
            resolution,
            language,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a lifecycle event, updating the status together with the paths
    /// the event produces. The record is untouched on `WrongState`.
    pub fn apply(&mut self, event: &JobEvent) -> Result<()> {
        let next = self.status.transition(event)?;

        match event {
            JobEvent::TranscriptionSucceeded { subtitle_path } => {
                self.generated_subtitle_path = Some(subtitle_path.clone());
            }
            JobEvent::BurnRequested {
                edited_subtitle_path,
                resolution,
            } => {
                self.edited_subtitle_path = Some(edited_subtitle_path.clone());
                self.resolution = *resolution;
            }
            JobEvent::BurnSucceeded { output_path } => {
                self.output_video_path = Some(output_path.clone());
            }
            JobEvent::TranscriptionFailed { error } | JobEvent::BurnFailed { error } => {
                self.error = Some(error.clone());
            }
            JobEvent::EditorOpened => {}
        }

        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Subtitle the burn stage should consume
    pub fn current_subtitle_path(&self) -> Option<&PathBuf> {
        self.edited_subtitle_path
            .as_ref()
            .or(self.generated_subtitle_path.as_ref())
    }
}
