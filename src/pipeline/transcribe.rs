use std::path::PathBuf;
use tracing::{error, info, warn};

use super::{Outcome, Pipeline};
use crate::dispatch::TranscribeTask;
use crate::error::{Result, SubburnError};
use crate::job::{JobEvent, JobStatus};
use crate::storage::{ScratchDir, file_stem, remove_dir_all_if_exists, remove_if_exists};
use crate::subtitle::write_srt;

impl Pipeline {
    /// Speech-to-text stage. Skipped when the job is no longer pending.
    pub async fn transcribe(&self, task: &TranscribeTask) -> Outcome {
        let record = match self.store.get(&task.job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Transcribe task for unknown job {}", task.job_id);
                remove_if_exists(&task.video_path).await;
                return Outcome::failed(&SubburnError::NotFound(task.job_id.to_string()));
            }
            Err(e) => return self.fail_transcription(task, e).await,
        };

        if record.status != JobStatus::Pending {
            info!("Job {} is {}, skipping transcription", task.job_id, record.status);
            return Outcome::Skipped {
                reason: format!("job is {}", record.status),
            };
        }

        info!("Transcribing job {} ({})", task.job_id, task.filename);
        match self.run_transcription(task).await {
            Ok(outcome) => outcome,
            Err(e) => self.fail_transcription(task, e).await,
        }
    }

    async fn run_transcription(&self, task: &TranscribeTask) -> Result<Outcome> {
        let duration = self.media.probe_duration(&task.video_path).await?;
        if task.limits.exceeds_duration(duration) {
            let minutes = task.limits.max_duration_minutes;
            return Err(SubburnError::QuotaExceeded(format!(
                "Video is too long. The maximum duration is {} minute{}",
                minutes,
                if minutes == 1 { "" } else { "s" }
            )));
        }

        // Scratch audio is keyed by job id, so a redelivery replaces what an
        // earlier attempt left and abandonment can find it. The guard also
        // removes it when this future is cancelled.
        let scratch = ScratchDir::create(self.layout.scratch_dir(&task.job_id)).await?;
        let audio_path = scratch
            .path()
            .join(format!("{}.{}", file_stem(&task.filename), self.audio_extension));

        self.media.extract_audio(&task.video_path, &audio_path).await?;

        let segments = self
            .engine
            .transcribe(&audio_path, task.language.as_deref())
            .await
            .map_err(|e| match e {
                SubburnError::Http(e) => {
                    warn!("Transcription request failed: {}", e);
                    SubburnError::Transcriber("The transcription service could not be reached".to_string())
                }
                other => other,
            })?;

        let subtitle_path = self.layout.subtitle_path(&task.job_id, &task.filename);
        write_srt(&segments, &subtitle_path).await?;

        drop(scratch);

        self.store
            .transition(
                &task.job_id,
                &JobEvent::TranscriptionSucceeded {
                    subtitle_path: subtitle_path.clone(),
                },
            )
            .await?;

        info!("Job {} transcribed: {} segments", task.job_id, segments.len());
        Ok(Outcome::Transcribed {
            subtitle_path,
            segments: segments.len(),
        })
    }

    async fn fail_transcription(&self, task: &TranscribeTask, e: SubburnError) -> Outcome {
        error!("Transcription of job {} failed: {}", task.job_id, e);

        let produced: PathBuf = self.layout.subtitle_path(&task.job_id, &task.filename);
        remove_if_exists(&task.video_path).await;
        remove_if_exists(&produced).await;
        remove_dir_all_if_exists(&self.layout.scratch_dir(&task.job_id)).await;

        if let Err(store_error) = self.store.fail(&task.job_id, &e.public_message()).await {
            error!("Could not mark job {} failed: {}", task.job_id, store_error);
        }
        Outcome::failed(&e)
    }
}
