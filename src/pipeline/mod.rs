//! Pipeline orchestrator: the idempotent transcribe and burn stages.
//!
//! Every path a stage touches is derived from its task, never from memory,
//! so a redelivered unit reaches the same terminal outcome. No error leaves
//! a stage: failures become an [`Outcome::Failed`] after the job is failed
//! and its files are removed.

mod burn;
mod transcribe;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub use crate::dispatch::Outcome;

use crate::dispatch::{HandlerRegistry, TaskHandler, TaskKind, UnitOfWork};
use crate::error::FailureKind;
use crate::job::JobStore;
use crate::media::MediaToolkit;
use crate::quota::UsageLedger;
use crate::storage::{UploadLayout, remove_dir_all_if_exists, remove_dir_if_empty, remove_if_exists};
use crate::transcribe::SpeechToText;

pub struct Pipeline {
    layout: UploadLayout,
    store: Arc<dyn JobStore>,
    media: Arc<dyn MediaToolkit>,
    engine: Arc<dyn SpeechToText>,
    ledger: Arc<dyn UsageLedger>,
    audio_extension: String,
}

impl Pipeline {
    pub fn new(
        layout: UploadLayout,
        store: Arc<dyn JobStore>,
        media: Arc<dyn MediaToolkit>,
        engine: Arc<dyn SpeechToText>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        Self {
            layout,
            store,
            media,
            engine,
            ledger,
            audio_extension: "mp3".to_string(),
        }
    }

    /// Extension of the scratch audio file handed to the engine
    pub fn with_audio_extension(mut self, extension: impl Into<String>) -> Self {
        self.audio_extension = extension.into();
        self
    }

    pub fn layout(&self) -> &UploadLayout {
        &self.layout
    }

    /// Fail the unit's job if it is still active and remove the unit's files
    pub async fn abandon(&self, unit: &UnitOfWork, reason: &str) {
        let job_id = unit.job_id();
        match self.store.fail(job_id, reason).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!("Job {} already settled, nothing to abandon", job_id);
                return;
            }
            Err(e) => warn!("Could not fail abandoned job {}: {}", job_id, e),
        }

        warn!("Abandoned {} for job {}: {}", unit.kind(), job_id, reason);
        match unit {
            UnitOfWork::Transcribe(task) => {
                remove_if_exists(&task.video_path).await;
                remove_if_exists(&self.layout.subtitle_path(job_id, &task.filename)).await;
                remove_dir_all_if_exists(&self.layout.scratch_dir(job_id)).await;
            }
            UnitOfWork::Burn(task) => {
                remove_if_exists(&task.video_path).await;
                remove_if_exists(&task.subtitle_path).await;
                let output = self.layout.output_video_path(job_id, &task.filename);
                remove_if_exists(&output).await;
                if let Some(dir) = output.parent() {
                    remove_dir_if_empty(dir).await;
                }
            }
        }
    }

    /// Registry routing both task kinds to this pipeline
    pub fn registry(self: &Arc<Self>) -> HandlerRegistry {
        HandlerRegistry::new()
            .with(TaskKind::Transcribe, Arc::new(TranscribeHandler(self.clone())))
            .with(TaskKind::Burn, Arc::new(BurnHandler(self.clone())))
    }
}

fn mismatched(unit: &UnitOfWork) -> Outcome {
    Outcome::Failed {
        kind: FailureKind::Internal,
        message: format!("{} task routed to the wrong handler", unit.kind()),
    }
}

pub struct TranscribeHandler(pub Arc<Pipeline>);

#[async_trait]
impl TaskHandler for TranscribeHandler {
    async fn handle(&self, unit: &UnitOfWork) -> Outcome {
        match unit {
            UnitOfWork::Transcribe(task) => self.0.transcribe(task).await,
            other => mismatched(other),
        }
    }

    async fn abandon(&self, unit: &UnitOfWork, reason: &str) {
        self.0.abandon(unit, reason).await
    }
}

pub struct BurnHandler(pub Arc<Pipeline>);

#[async_trait]
impl TaskHandler for BurnHandler {
    async fn handle(&self, unit: &UnitOfWork) -> Outcome {
        match unit {
            UnitOfWork::Burn(task) => self.0.burn(task).await,
            other => mismatched(other),
        }
    }

    async fn abandon(&self, unit: &UnitOfWork, reason: &str) {
        self.0.abandon(unit, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{BurnTask, TranscribeTask};
    use crate::error::{Result, SubburnError};
    use crate::job::{FileJobStore, JobId, JobRecord, JobStatus, OwnerId};
    use crate::media::{MockMediaToolkit, Resolution};
    use crate::quota::{FileUsageLedger, OwnerLimits};
    use crate::subtitle::Segment;
    use std::path::Path;

    struct OneLine;

    #[async_trait]
    impl SpeechToText for OneLine {
        async fn transcribe(&self, _audio_path: &Path, _language: Option<&str>) -> Result<Vec<Segment>> {
            Ok(vec![Segment::new(0.0, 2.0, "Hello there")])
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<FileJobStore>,
        layout: UploadLayout,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(FileJobStore::new(dir.path().join("state").join("jobs")));
            let layout = UploadLayout::new(dir.path().join("uploads"));
            std::fs::create_dir_all(layout.upload_dir()).unwrap();
            Self { dir, store, layout }
        }

        fn pipeline(&self, media: MockMediaToolkit) -> Pipeline {
            Pipeline::new(
                self.layout.clone(),
                self.store.clone(),
                Arc::new(media),
                Arc::new(OneLine),
                Arc::new(FileUsageLedger::new(self.dir.path().join("state").join("usage.json"))),
            )
        }

        async fn submit(&self, max_minutes: u32) -> TranscribeTask {
            let job_id = JobId::new();
            let video_path = self.layout.original_video_path("clip.mp4");
            std::fs::write(&video_path, b"video").unwrap();

            let record = JobRecord::new(
                job_id,
                OwnerId::from("alice"),
                video_path.clone(),
                "clip.mp4".to_string(),
                Resolution::Original,
                None,
            );
            self.store.insert(&record).await.unwrap();

            TranscribeTask {
                job_id,
                owner: OwnerId::from("alice"),
                video_path,
                filename: "clip.mp4".to_string(),
                language: None,
                limits: OwnerLimits { max_duration_minutes: max_minutes, max_daily_tries: None },
            }
        }
    }

    fn media_with_duration(duration: f64) -> MockMediaToolkit {
        let mut media = MockMediaToolkit::new();
        media.expect_probe_duration().returning(move |_| Ok(duration));
        media.expect_extract_audio().returning(|_, audio| {
            std::fs::write(audio, b"audio").unwrap();
            Ok(())
        });
        media
    }

    #[tokio::test]
    async fn test_duration_at_limit_is_accepted() {
        let fixture = Fixture::new();
        let task = fixture.submit(1).await;
        let pipeline = fixture.pipeline(media_with_duration(60.0));

        let outcome = pipeline.transcribe(&task).await;
        assert!(matches!(outcome, Outcome::Transcribed { segments: 1, .. }));

        let record = fixture.store.get(&task.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Transcribed);
        let srt = std::fs::read_to_string(record.generated_subtitle_path.unwrap()).unwrap();
        assert_eq!(srt, "1\n00:00:00,000 --> 00:00:02,000\nHello there\n\n");

        // Only the original and the subtitle remain; the scratch dir is gone
        assert_eq!(std::fs::read_dir(fixture.layout.upload_dir()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_duration_over_limit_fails_and_removes_source() {
        let fixture = Fixture::new();
        let task = fixture.submit(1).await;
        let mut media = MockMediaToolkit::new();
        media.expect_probe_duration().returning(|_| Ok(60.5));
        media.expect_extract_audio().never();
        let pipeline = fixture.pipeline(media);

        let outcome = pipeline.transcribe(&task).await;
        assert!(matches!(outcome, Outcome::Failed { kind: FailureKind::QuotaExceeded, .. }));
        assert!(!task.video_path.exists());

        let record = fixture.store.get(&task.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().contains("1 minute"));
    }

    #[tokio::test]
    async fn test_missing_probe_tool_fails_job() {
        let fixture = Fixture::new();
        let task = fixture.submit(5).await;
        let mut media = MockMediaToolkit::new();
        media.expect_probe_duration().returning(|_| {
            Err(SubburnError::ToolMissing { tool: "ffprobe".to_string() })
        });
        let pipeline = fixture.pipeline(media);

        let outcome = pipeline.transcribe(&task).await;
        assert!(matches!(outcome, Outcome::Failed { kind: FailureKind::ToolMissing, .. }));
        assert!(!task.video_path.exists());
        let record = fixture.store.get(&task.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_redelivered_transcribe_is_skipped() {
        let fixture = Fixture::new();
        let task = fixture.submit(5).await;
        let pipeline = fixture.pipeline(media_with_duration(10.0));
        assert!(matches!(pipeline.transcribe(&task).await, Outcome::Transcribed { .. }));

        let mut media = MockMediaToolkit::new();
        media.expect_probe_duration().never();
        let again = fixture.pipeline(media);
        assert!(matches!(again.transcribe(&task).await, Outcome::Skipped { .. }));
        assert!(task.video_path.exists());
    }

    #[tokio::test]
    async fn test_burn_on_wrong_state_leaves_files() {
        let fixture = Fixture::new();
        let task = fixture.submit(5).await;
        let pipeline = fixture.pipeline(media_with_duration(10.0));
        pipeline.transcribe(&task).await;

        let subtitle_path = fixture.layout.subtitle_path(&task.job_id, "clip.mp4");
        let burn = BurnTask {
            job_id: task.job_id,
            owner: task.owner.clone(),
            video_path: task.video_path.clone(),
            subtitle_path: subtitle_path.clone(),
            filename: task.filename.clone(),
            resolution: Resolution::Original,
            limits: task.limits,
        };

        let mut media = MockMediaToolkit::new();
        media.expect_burn_subtitles().never();
        let outcome = fixture.pipeline(media).burn(&burn).await;

        assert!(matches!(outcome, Outcome::Failed { kind: FailureKind::WrongState, .. }));
        assert!(task.video_path.exists());
        assert!(subtitle_path.exists());
        let record = fixture.store.get(&task.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Transcribed);
    }

    #[tokio::test]
    async fn test_abandon_fails_pending_job() {
        let fixture = Fixture::new();
        let task = fixture.submit(5).await;
        let pipeline = fixture.pipeline(MockMediaToolkit::new());

        pipeline
            .abandon(&UnitOfWork::Transcribe(task.clone()), "Processing took too long")
            .await;

        assert!(!task.video_path.exists());
        let record = fixture.store.get(&task.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Processing took too long"));
        assert!(record.generated_subtitle_path.is_none());

        // A settled job is left alone
        std::fs::write(&task.video_path, b"video").unwrap();
        pipeline.abandon(&UnitOfWork::Transcribe(task.clone()), "again").await;
        assert!(task.video_path.exists());
    }

    #[tokio::test]
    async fn test_abandon_removes_scratch_audio() {
        let fixture = Fixture::new();
        let task = fixture.submit(5).await;
        let scratch = fixture.layout.scratch_dir(&task.job_id);
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("clip.mp3"), b"audio").unwrap();
        let pipeline = fixture.pipeline(MockMediaToolkit::new());

        pipeline
            .abandon(&UnitOfWork::Transcribe(task.clone()), "Processing took too long")
            .await;

        assert!(!scratch.exists());
        assert_eq!(std::fs::read_dir(fixture.layout.upload_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rerun_replaces_leftover_scratch_audio() {
        let fixture = Fixture::new();
        let task = fixture.submit(5).await;
        let scratch = fixture.layout.scratch_dir(&task.job_id);
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("clip.mp3"), b"from a killed attempt").unwrap();

        let mut media = MockMediaToolkit::new();
        media.expect_probe_duration().returning(|_| Ok(10.0));
        media.expect_extract_audio().returning(|_, audio| {
            assert!(!audio.exists());
            std::fs::write(audio, b"audio").unwrap();
            Ok(())
        });
        let pipeline = fixture.pipeline(media);

        assert!(matches!(pipeline.transcribe(&task).await, Outcome::Transcribed { .. }));
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn test_failed_extraction_removes_scratch_dir() {
        let fixture = Fixture::new();
        let task = fixture.submit(5).await;
        let mut media = MockMediaToolkit::new();
        media.expect_probe_duration().returning(|_| Ok(10.0));
        media.expect_extract_audio().returning(|_, audio| {
            std::fs::write(audio, b"partial").unwrap();
            Err(SubburnError::EncodeFailed {
                operation: "Audio extraction".to_string(),
                code: Some(1),
                stderr: "broken stream".to_string(),
            })
        });
        let pipeline = fixture.pipeline(media);

        let outcome = pipeline.transcribe(&task).await;
        assert!(matches!(outcome, Outcome::Failed { kind: FailureKind::EncodeFailed, .. }));
        assert!(!fixture.layout.scratch_dir(&task.job_id).exists());
        assert_eq!(std::fs::read_dir(fixture.layout.upload_dir()).unwrap().count(), 0);
    }
}
