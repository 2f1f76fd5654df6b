use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::dispatch::{SpoolQueue, Worker, WorkerPool};
use crate::error::Result;
use crate::job::{FileJobStore, JobStore};
use crate::media::{MediaToolkit, MediaToolkitFactory};
use crate::pipeline::Pipeline;
use crate::quota::{FileUsageLedger, UsageLedger};
use crate::service::JobService;
use crate::storage::UploadLayout;
use crate::transcribe::{EngineFactory, SpeechToText};

/// Every component of one process, wired from configuration
pub struct Workflow {
    config: Config,
    media: Arc<dyn MediaToolkit>,
    engine: Arc<dyn SpeechToText>,
    queue: Arc<SpoolQueue>,
    pipeline: Arc<Pipeline>,
    service: JobService,
}

impl Workflow {
    pub fn new(config: Config) -> Self {
        let media = MediaToolkitFactory::create(config.media.clone());
        let engine: Arc<dyn SpeechToText> = EngineFactory::shared(config.transcriber.clone());
        Self::with_components(config, media, engine)
    }

    /// Wire the stores from `config` around the given media toolkit and engine
    pub fn with_components(
        config: Config,
        media: Arc<dyn MediaToolkit>,
        engine: Arc<dyn SpeechToText>,
    ) -> Self {
        let layout = UploadLayout::new(&config.storage.upload_dir);
        let state_dir = &config.storage.state_dir;

        let store: Arc<dyn JobStore> = Arc::new(FileJobStore::new(state_dir.join("jobs")));
        let ledger: Arc<dyn UsageLedger> = Arc::new(FileUsageLedger::new(state_dir.join("usage.json")));
        let queue = Arc::new(SpoolQueue::new(state_dir.join("queue")));

        let pipeline = Arc::new(
            Pipeline::new(layout.clone(), store.clone(), media.clone(), engine.clone(), ledger.clone())
                .with_audio_extension(config.media.audio_extension.clone()),
        );
        let service = JobService::new(layout, store, queue.clone(), ledger, config.limits.clone());

        Self {
            config,
            media,
            engine,
            queue,
            pipeline,
            service,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn media(&self) -> &Arc<dyn MediaToolkit> {
        &self.media
    }

    pub fn queue(&self) -> &Arc<SpoolQueue> {
        &self.queue
    }

    /// Create the upload and state directories and the queue layout
    pub async fn prepare(&self) -> Result<()> {
        self.pipeline.layout().ensure().await?;
        tokio::fs::create_dir_all(&self.config.storage.state_dir).await?;
        self.queue.init().await?;
        info!(
            "Storage ready: uploads in {}, state in {}",
            self.config.storage.upload_dir.display(),
            self.config.storage.state_dir.display()
        );
        Ok(())
    }

    /// Check the media tools and the transcription engine workers depend on
    pub async fn check_dependencies(&self) -> Result<()> {
        self.media.check_availability().await?;
        self.engine.check_availability().await
    }

    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(
            self.queue.clone(),
            Arc::new(self.pipeline.registry()),
            self.config.dispatcher.clone(),
        )
    }

    /// A single worker, for running units inline
    pub fn worker(&self, id: &str) -> Worker {
        self.worker_pool().worker(id)
    }
}
