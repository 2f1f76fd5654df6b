//! Submission boundary used by the presentation layer.
//!
//! Owner checks happen here: every lookup goes through
//! [`JobStore::get_owned`], so a job owned by someone else is reported as
//! missing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{error, info, warn};

use crate::config::LimitsConfig;
use crate::dispatch::{BurnTask, LiveState, QueueStats, SpoolQueue, TaskId, TranscribeTask, UnitOfWork};
use crate::error::{Result, SubburnError};
use crate::job::{JobEvent, JobId, JobRecord, JobStatus, JobStore, OwnerId};
use crate::media::Resolution;
use crate::quota::{OwnerLimits, UsageEntry, UsageLedger};
use crate::storage::{UploadLayout, remove_if_exists, sanitize_filename, write_atomic};

/// Subtitle text and settings shown in the editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorSession {
    pub job_id: JobId,
    pub subtitle_text: String,
    pub filename: String,
    pub resolution: Resolution,
    pub language: Option<String>,
}

/// Status as shown to the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Queued,
    Running,
    Pending,
    Transcribed,
    Editing,
    Burning,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusDetail {
    /// Subtitles are ready for editing
    Redirect,
    /// Burned video, relative to the upload directory
    Download { file: String },
    Error { message: String },
    Progress { label: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub job_id: JobId,
    pub status: ReportedStatus,
    pub detail: StatusDetail,
    pub updated_at: DateTime<Utc>,
}

pub struct JobService {
    layout: UploadLayout,
    store: Arc<dyn JobStore>,
    queue: Arc<SpoolQueue>,
    ledger: Arc<dyn UsageLedger>,
    limits: LimitsConfig,
}

impl JobService {
    pub fn new(
        layout: UploadLayout,
        store: Arc<dyn JobStore>,
        queue: Arc<SpoolQueue>,
        ledger: Arc<dyn UsageLedger>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            layout,
            store,
            queue,
            ledger,
            limits,
        }
    }

    /// Limits applied to an owner's burn stage
    pub fn limits_for(&self, owner: &OwnerId) -> OwnerLimits {
        self.limits.for_owner(owner.as_str())
    }

    /// Store an upload, create its job and enqueue transcription
    pub async fn submit<R>(
        &self,
        owner: &OwnerId,
        limits: OwnerLimits,
        mut source: R,
        filename: &str,
        resolution: Resolution,
        language: Option<&str>,
    ) -> Result<JobId>
    where
        R: AsyncRead + Unpin + Send,
    {
        if let Some(max_tries) = limits.max_daily_tries {
            let tries = self.ledger.tries_today(owner, Utc::now().date_naive()).await?;
            if tries >= max_tries {
                return Err(SubburnError::QuotaExceeded(format!(
                    "Daily limit reached: {} of {} videos processed today",
                    tries, max_tries
                )));
            }
        }

        let filename = sanitize_filename(filename).ok_or(SubburnError::NoFile)?;
        self.layout.ensure().await?;
        let video_path = self.layout.original_video_path(&filename);

        let written = {
            let mut file = tokio::fs::File::create(&video_path).await?;
            let copied = tokio::io::copy(&mut source, &mut file).await;
            let flushed = file.flush().await;
            match (copied, flushed) {
                (Ok(bytes), Ok(())) => bytes,
                (Err(e), _) | (_, Err(e)) => {
                    remove_if_exists(&video_path).await;
                    return Err(e.into());
                }
            }
        };
        if written == 0 {
            remove_if_exists(&video_path).await;
            return Err(SubburnError::NoFile);
        }

        let language = normalize_language(language);
        let job_id = JobId::new();
        let record = JobRecord::new(
            job_id,
            owner.clone(),
            video_path.clone(),
            filename.clone(),
            resolution,
            language.clone(),
        );
        if let Err(e) = self.store.insert(&record).await {
            remove_if_exists(&video_path).await;
            return Err(e);
        }

        let unit = UnitOfWork::Transcribe(TranscribeTask {
            job_id,
            owner: owner.clone(),
            video_path: video_path.clone(),
            filename,
            language,
            limits,
        });
        // The transcription task shares the job's id
        let task_id = TaskId::from_uuid(*job_id.as_uuid());
        if let Err(e) = self.queue.enqueue_with_id(task_id, unit).await {
            error!("Could not enqueue transcription for job {}: {}", job_id, e);
            self.abort(&job_id, &[&video_path], &e).await;
            return Err(e);
        }

        info!("Submitted job {} for {} ({} bytes)", job_id, owner, written);
        Ok(job_id)
    }

    /// Open the editor on a transcribed job
    pub async fn open_editor(&self, job_id: &JobId, owner: &OwnerId) -> Result<EditorSession> {
        let record = self.store.get_owned(job_id, owner).await?;
        require_editable(&record)?;

        let subtitle_path = record
            .current_subtitle_path()
            .ok_or_else(|| SubburnError::MissingArtifact("the subtitle file was never written".to_string()))?;
        let subtitle_text = match tokio::fs::read_to_string(subtitle_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SubburnError::MissingArtifact(
                    "the subtitle file is no longer available".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let record = self.store.transition(job_id, &JobEvent::EditorOpened).await?;
        Ok(EditorSession {
            job_id: *job_id,
            subtitle_text,
            filename: record.original_filename,
            resolution: record.resolution,
            language: record.language,
        })
    }

    /// Persist the edited subtitles and enqueue the burn stage
    pub async fn save_edit(
        &self,
        job_id: &JobId,
        owner: &OwnerId,
        subtitle_text: &str,
        resolution: Resolution,
    ) -> Result<TaskId> {
        let record = self.store.get_owned(job_id, owner).await?;
        require_editable(&record)?;

        let subtitle_path = record
            .generated_subtitle_path
            .clone()
            .ok_or_else(|| SubburnError::MissingArtifact("the subtitle file was never written".to_string()))?;

        // Edited text is trusted verbatim
        write_atomic(&subtitle_path, subtitle_text.as_bytes()).await?;

        let record = self
            .store
            .transition(
                job_id,
                &JobEvent::BurnRequested {
                    edited_subtitle_path: subtitle_path.clone(),
                    resolution,
                },
            )
            .await?;

        let unit = UnitOfWork::Burn(BurnTask {
            job_id: *job_id,
            owner: owner.clone(),
            video_path: record.original_video_path.clone(),
            subtitle_path: subtitle_path.clone(),
            filename: record.original_filename.clone(),
            resolution,
            limits: self.limits_for(owner),
        });
        match self.queue.enqueue(unit).await {
            Ok(task_id) => {
                info!("Job {} queued for burning at {}", job_id, resolution);
                Ok(task_id)
            }
            Err(e) => {
                error!("Could not enqueue burn for job {}: {}", job_id, e);
                self.abort(job_id, &[&record.original_video_path, &subtitle_path], &e)
                    .await;
                Err(e)
            }
        }
    }

    /// Owner facing status. A record past `pending` is authoritative; a
    /// pending job reports where the dispatcher holds its unit.
    pub async fn status(&self, job_id: &JobId, owner: &OwnerId) -> Result<StatusReport> {
        let record = self.store.get_owned(job_id, owner).await?;

        let (status, detail) = match record.status {
            JobStatus::Pending => match self.queue.live_state(job_id).await? {
                LiveState::Queued => (ReportedStatus::Queued, progress("Waiting in queue")),
                LiveState::Running => (ReportedStatus::Running, progress("Transcribing audio")),
                LiveState::Unknown => (ReportedStatus::Pending, progress("Waiting to start")),
            },
            JobStatus::Transcribed => (ReportedStatus::Transcribed, StatusDetail::Redirect),
            JobStatus::Editing => (ReportedStatus::Editing, progress("Editing subtitles")),
            JobStatus::Burning => (ReportedStatus::Burning, progress("Burning subtitles into the video")),
            JobStatus::Completed => self.completed_detail(&record).await,
            JobStatus::Failed => (
                ReportedStatus::Failed,
                StatusDetail::Error {
                    message: record
                        .error
                        .clone()
                        .unwrap_or_else(|| "Processing failed".to_string()),
                },
            ),
        };

        Ok(StatusReport {
            job_id: *job_id,
            status,
            detail,
            updated_at: record.updated_at,
        })
    }

    async fn completed_detail(&self, record: &JobRecord) -> (ReportedStatus, StatusDetail) {
        let vanished = || {
            (
                ReportedStatus::Failed,
                StatusDetail::Error {
                    message: "The processed video is no longer available".to_string(),
                },
            )
        };

        let Some(output) = &record.output_video_path else {
            return vanished();
        };
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            warn!("Output of completed job {} is missing", record.id);
            return vanished();
        }

        let file = self.layout.public_reference(output).unwrap_or_else(|| {
            output
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default()
        });
        (ReportedStatus::Completed, StatusDetail::Download { file })
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub async fn usage_history(&self, owner: &OwnerId) -> Result<Vec<UsageEntry>> {
        self.ledger.usage_history(owner).await
    }

    /// Fail a job whose unit never reached the queue
    async fn abort(&self, job_id: &JobId, files: &[&std::path::PathBuf], e: &SubburnError) {
        for file in files {
            remove_if_exists(file).await;
        }
        if let Err(store_error) = self.store.fail(job_id, &e.public_message()).await {
            error!("Could not mark job {} failed: {}", job_id, store_error);
        }
    }
}

fn progress(label: &str) -> StatusDetail {
    StatusDetail::Progress {
        label: label.to_string(),
    }
}

fn require_editable(record: &JobRecord) -> Result<()> {
    match record.status {
        JobStatus::Transcribed | JobStatus::Editing => Ok(()),
        other => Err(SubburnError::WrongState(format!(
            "job is {}; subtitles can only be edited once transcription has finished",
            other
        ))),
    }
}

/// Empty and "auto" mean auto-detect
fn normalize_language(language: Option<&str>) -> Option<String> {
    language
        .map(str::trim)
        .filter(|lang| !lang.is_empty() && !lang.eq_ignore_ascii_case("auto"))
        .map(str::to_string)
}
