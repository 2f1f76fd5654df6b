use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::{Outcome, Pipeline};
use crate::dispatch::BurnTask;
use crate::error::{Result, SubburnError};
use crate::job::{JobEvent, JobStatus};
use crate::storage::{remove_dir_if_empty, remove_if_exists};

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

impl Pipeline {
    /// Burn-in stage. Requires both inputs and a `burning` job.
    pub async fn burn(&self, task: &BurnTask) -> Outcome {
        let video_present = exists(&task.video_path).await;
        let subtitle_present = exists(&task.subtitle_path).await;

        if !(video_present && subtitle_present) {
            let missing = if video_present { "subtitle file" } else { "source video" };
            let e = SubburnError::MissingArtifact(format!("the {} is no longer available", missing));
            warn!("Burn for job {} cannot start: {}", task.job_id, e);

            remove_if_exists(&task.video_path).await;
            remove_if_exists(&task.subtitle_path).await;
            match self.fail_if_burning(task, &e).await {
                // A completed job keeps its output
                Ok(true) => {
                    self.remove_output(&self.layout.output_video_path(&task.job_id, &task.filename))
                        .await
                }
                Ok(false) => {}
                Err(store_error) => {
                    error!("Could not mark job {} failed: {}", task.job_id, store_error);
                }
            }
            return Outcome::failed(&e);
        }

        let record = match self.store.get(&task.job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Outcome::failed(&SubburnError::NotFound(task.job_id.to_string())),
            Err(e) => return Outcome::failed(&e),
        };
        if record.status != JobStatus::Burning {
            let e = SubburnError::WrongState(format!("job is {}, not burning", record.status));
            warn!("Burn for job {} refused: {}", task.job_id, e);
            return Outcome::failed(&e);
        }

        let output_path = self.layout.output_video_path(&task.job_id, &task.filename);
        info!("Burning subtitles for job {} at {}", task.job_id, task.resolution);
        match self.run_burn(task, &output_path).await {
            Ok(()) => self.complete_burn(task, output_path).await,
            Err(e) => self.fail_burn(task, &output_path, e).await,
        }
    }

    async fn run_burn(&self, task: &BurnTask, output_path: &Path) -> Result<()> {
        if let Some(dir) = output_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        self.media
            .burn_subtitles(&task.video_path, &task.subtitle_path, &task.resolution, output_path)
            .await
    }

    async fn complete_burn(&self, task: &BurnTask, output_path: PathBuf) -> Outcome {
        remove_if_exists(&task.video_path).await;
        remove_if_exists(&task.subtitle_path).await;

        let event = JobEvent::BurnSucceeded {
            output_path: output_path.clone(),
        };
        if let Err(e) = self.store.transition(&task.job_id, &event).await {
            error!("Job {} burned but could not be completed: {}", task.job_id, e);
            self.remove_output(&output_path).await;
            if let Err(store_error) = self.store.fail(&task.job_id, &e.public_message()).await {
                error!("Could not mark job {} failed: {}", task.job_id, store_error);
            }
            return Outcome::failed(&e);
        }

        // Usage counts only jobs that reached `completed`
        let today = Utc::now().date_naive();
        if let Err(e) = self.ledger.record_completion(&task.owner, &task.limits, today).await {
            error!("Failed to record usage for {}: {}", task.owner, e);
        }
        info!("Job {} completed", task.job_id);
        Outcome::Completed { output_path }
    }

    async fn fail_burn(&self, task: &BurnTask, output_path: &Path, e: SubburnError) -> Outcome {
        error!("Burn of job {} failed: {}", task.job_id, e);

        remove_if_exists(&task.video_path).await;
        remove_if_exists(&task.subtitle_path).await;
        self.remove_output(output_path).await;

        if let Err(store_error) = self.fail_if_burning(task, &e).await {
            error!("Could not mark job {} failed: {}", task.job_id, store_error);
        }
        Outcome::failed(&e)
    }

    /// Fail the job if it is still burning; `true` when it was
    async fn fail_if_burning(&self, task: &BurnTask, e: &SubburnError) -> Result<bool> {
        let burning = matches!(
            self.store.get(&task.job_id).await?,
            Some(record) if record.status == JobStatus::Burning
        );
        if burning {
            self.store
                .transition(
                    &task.job_id,
                    &JobEvent::BurnFailed {
                        error: e.public_message(),
                    },
                )
                .await?;
        }
        Ok(burning)
    }

    async fn remove_output(&self, output_path: &Path) {
        remove_if_exists(output_path).await;
        if let Some(dir) = output_path.parent() {
            remove_dir_if_empty(dir).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FileJobStore, JobId, JobRecord, JobStore, OwnerId};
    use crate::media::{MockMediaToolkit, Resolution};
    use crate::quota::{FileUsageLedger, OwnerLimits, UsageLedger};
    use crate::error::FailureKind;
    use crate::storage::UploadLayout;
    use crate::transcribe::SpeechToText;
    use crate::subtitle::Segment;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Silent;

    #[async_trait]
    impl SpeechToText for Silent {
        async fn transcribe(&self, _audio_path: &Path, _language: Option<&str>) -> Result<Vec<Segment>> {
            Ok(Vec::new())
        }
    }

    /// A job already in `burning` with both inputs on disk
    async fn burning_job(dir: &Path, store: &FileJobStore, layout: &UploadLayout) -> BurnTask {
        let job_id = JobId::new();
        let video_path = layout.original_video_path("clip.mp4");
        let subtitle_path = layout.subtitle_path(&job_id, "clip.mp4");
        std::fs::create_dir_all(dir.join("uploads")).unwrap();
        std::fs::write(&video_path, b"video").unwrap();
        std::fs::write(&subtitle_path, "1\n00:00:00,000 --> 00:00:01,000\nHi\n\n").unwrap();

        let record = JobRecord::new(
            job_id,
            OwnerId::from("alice"),
            video_path.clone(),
            "clip.mp4".to_string(),
            Resolution::Original,
            None,
        );
        store.insert(&record).await.unwrap();
        store
            .transition(&job_id, &JobEvent::TranscriptionSucceeded { subtitle_path: subtitle_path.clone() })
            .await
            .unwrap();
        store
            .transition(
                &job_id,
                &JobEvent::BurnRequested {
                    edited_subtitle_path: subtitle_path.clone(),
                    resolution: Resolution::Fixed { width: 1280, height: 720 },
                },
            )
            .await
            .unwrap();

        BurnTask {
            job_id,
            owner: OwnerId::from("alice"),
            video_path,
            subtitle_path,
            filename: "clip.mp4".to_string(),
            resolution: Resolution::Fixed { width: 1280, height: 720 },
            limits: OwnerLimits { max_duration_minutes: 1, max_daily_tries: Some(3) },
        }
    }

    #[tokio::test]
    async fn test_encoder_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileJobStore::new(dir.path().join("jobs")));
        let layout = UploadLayout::new(dir.path().join("uploads"));
        let ledger = Arc::new(FileUsageLedger::new(dir.path().join("usage.json")));
        let task = burning_job(dir.path(), &store, &layout).await;

        let mut media = MockMediaToolkit::new();
        media.expect_burn_subtitles().returning(|_, _, _, output| {
            std::fs::write(output, b"partial").unwrap();
            Err(SubburnError::EncodeFailed {
                operation: "Subtitle burn".to_string(),
                code: Some(1),
                stderr: "Invalid data found".to_string(),
            })
        });
        let pipeline = Pipeline::new(layout.clone(), store.clone(), Arc::new(media), Arc::new(Silent), ledger.clone());

        let outcome = pipeline.burn(&task).await;
        assert!(matches!(outcome, Outcome::Failed { kind: FailureKind::EncodeFailed, .. }));
        assert!(!task.video_path.exists());
        assert!(!task.subtitle_path.exists());
        assert!(!layout.output_video_path(&task.job_id, "clip.mp4").exists());

        let record = store.get(&task.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Subtitle burn failed with exit code 1"));
        assert!(ledger.usage_history(&task.owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_success_records_usage_and_try() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileJobStore::new(dir.path().join("jobs")));
        let layout = UploadLayout::new(dir.path().join("uploads"));
        let ledger = Arc::new(FileUsageLedger::new(dir.path().join("usage.json")));
        let task = burning_job(dir.path(), &store, &layout).await;

        let mut media = MockMediaToolkit::new();
        media
            .expect_burn_subtitles()
            .withf(|_, _, resolution, _| matches!(resolution, Resolution::Fixed { width: 1280, height: 720 }))
            .returning(|_, _, _, output| {
                std::fs::write(output, b"burned").unwrap();
                Ok(())
            });
        let pipeline = Pipeline::new(layout.clone(), store.clone(), Arc::new(media), Arc::new(Silent), ledger.clone());

        let outcome = pipeline.burn(&task).await;
        let output_path = match outcome {
            Outcome::Completed { output_path } => output_path,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert!(output_path.ends_with(format!("{}/subtitled_clip.mp4", task.job_id)));
        assert!(output_path.exists());
        assert!(!task.video_path.exists());
        assert!(!task.subtitle_path.exists());

        let today = Utc::now().date_naive();
        assert_eq!(ledger.usage_history(&task.owner).await.unwrap()[0].videos_processed, 1);
        assert_eq!(ledger.tries_today(&task.owner, today).await.unwrap(), 1);
    }

    fn burned_ok() -> MockMediaToolkit {
        let mut media = MockMediaToolkit::new();
        media.expect_burn_subtitles().returning(|_, _, _, output| {
            std::fs::write(output, b"burned").unwrap();
            Ok(())
        });
        media
    }

    #[tokio::test]
    async fn test_missing_input_fails_burning_job_and_clears_leftovers() {
        for missing in ["video", "subtitle"] {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(FileJobStore::new(dir.path().join("jobs")));
            let layout = UploadLayout::new(dir.path().join("uploads"));
            let ledger = Arc::new(FileUsageLedger::new(dir.path().join("usage.json")));
            let task = burning_job(dir.path(), &store, &layout).await;

            let (gone, survivor) = match missing {
                "video" => (&task.video_path, &task.subtitle_path),
                _ => (&task.subtitle_path, &task.video_path),
            };
            std::fs::remove_file(gone).unwrap();

            let mut media = MockMediaToolkit::new();
            media.expect_burn_subtitles().never();
            let pipeline = Pipeline::new(layout.clone(), store.clone(), Arc::new(media), Arc::new(Silent), ledger);

            let outcome = pipeline.burn(&task).await;
            assert!(
                matches!(outcome, Outcome::Failed { kind: FailureKind::MissingArtifact, .. }),
                "{} missing: {:?}",
                missing,
                outcome
            );
            assert!(!survivor.exists(), "{} missing: survivor left behind", missing);

            let output = layout.output_video_path(&task.job_id, "clip.mp4");
            assert!(!output.parent().unwrap().exists());

            let record = store.get(&task.job_id).await.unwrap().unwrap();
            assert_eq!(record.status, JobStatus::Failed);
            assert!(record.error.is_some());
        }
    }

    #[tokio::test]
    async fn test_missing_input_removes_output_of_burning_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileJobStore::new(dir.path().join("jobs")));
        let layout = UploadLayout::new(dir.path().join("uploads"));
        let ledger = Arc::new(FileUsageLedger::new(dir.path().join("usage.json")));
        let task = burning_job(dir.path(), &store, &layout).await;

        // Output of an attempt that died before completing the job
        let output = layout.output_video_path(&task.job_id, "clip.mp4");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, b"burned").unwrap();
        std::fs::remove_file(&task.video_path).unwrap();
        std::fs::remove_file(&task.subtitle_path).unwrap();

        let pipeline = Pipeline::new(layout.clone(), store.clone(), Arc::new(burned_ok()), Arc::new(Silent), ledger);

        let outcome = pipeline.burn(&task).await;
        assert!(matches!(outcome, Outcome::Failed { kind: FailureKind::MissingArtifact, .. }));
        assert!(!output.exists());
        assert!(!output.parent().unwrap().exists());
        assert_eq!(store.get(&task.job_id).await.unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_rerun_of_completed_job_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileJobStore::new(dir.path().join("jobs")));
        let layout = UploadLayout::new(dir.path().join("uploads"));
        let ledger = Arc::new(FileUsageLedger::new(dir.path().join("usage.json")));
        let task = burning_job(dir.path(), &store, &layout).await;
        let pipeline = Pipeline::new(layout.clone(), store.clone(), Arc::new(burned_ok()), Arc::new(Silent), ledger);

        let output = match pipeline.burn(&task).await {
            Outcome::Completed { output_path } => output_path,
            other => panic!("unexpected outcome: {:?}", other),
        };

        let rerun = pipeline.burn(&task).await;
        assert!(matches!(rerun, Outcome::Failed { kind: FailureKind::MissingArtifact, .. }));
        assert!(output.exists());
        assert_eq!(store.get(&task.job_id).await.unwrap().unwrap().status, JobStatus::Completed);
    }

    /// Store whose `burning -> completed` write always fails
    struct FailingCompletion(Arc<FileJobStore>);

    #[async_trait]
    impl JobStore for FailingCompletion {
        async fn insert(&self, record: &JobRecord) -> Result<()> {
            self.0.insert(record).await
        }

        async fn get(&self, id: &JobId) -> Result<Option<JobRecord>> {
            self.0.get(id).await
        }

        async fn transition(&self, id: &JobId, event: &JobEvent) -> Result<JobRecord> {
            match event {
                JobEvent::BurnSucceeded { .. } => Err(SubburnError::Io(std::io::Error::other(
                    "no space left on device",
                ))),
                _ => self.0.transition(id, event).await,
            }
        }
    }

    #[tokio::test]
    async fn test_completion_write_failure_fails_job_without_usage() {
        let dir = tempfile::tempdir().unwrap();
        let files = Arc::new(FileJobStore::new(dir.path().join("jobs")));
        let layout = UploadLayout::new(dir.path().join("uploads"));
        let ledger = Arc::new(FileUsageLedger::new(dir.path().join("usage.json")));
        let task = burning_job(dir.path(), &files, &layout).await;

        let store = Arc::new(FailingCompletion(files.clone()));
        let pipeline = Pipeline::new(layout.clone(), store, Arc::new(burned_ok()), Arc::new(Silent), ledger.clone());

        let outcome = pipeline.burn(&task).await;
        assert!(matches!(outcome, Outcome::Failed { .. }));

        let record = files.get(&task.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.output_video_path.is_none());
        assert!(!layout.output_video_path(&task.job_id, "clip.mp4").exists());
        assert!(!task.video_path.exists());
        assert!(!task.subtitle_path.exists());
        assert!(ledger.usage_history(&task.owner).await.unwrap().is_empty());
    }
}
