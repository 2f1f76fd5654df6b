// Speech-to-text engines
//
// This module provides the engines behind one trait:
// - WhisperCli: the local `whisper` command-line tool
// - Remote: an OpenAI-compatible HTTP transcription endpoint
// - SharedEngine: the process-wide, lazily built handle the pipeline uses
//
// To add an engine, map its native output with a SegmentMapper, add a
// TranscriberBackend variant and extend EngineFactory.

pub mod common;
pub mod remote;
pub mod whisper_cli;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

pub use common::*;
pub use remote::RemoteEngine;
pub use whisper_cli::WhisperCliEngine;

use crate::config::{TranscriberBackend, TranscriberConfig};
use crate::error::Result;
use crate::subtitle::Segment;

/// A speech-to-text engine
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe an audio file; `None` lets the engine detect the language
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Vec<Segment>>;

    /// Check that the engine can run before any work is accepted
    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

type EngineLoader = Box<dyn Fn() -> Result<Arc<dyn SpeechToText>> + Send + Sync>;

/// Engine built on first use and shared by every worker of the process
pub struct SharedEngine {
    cell: OnceCell<Arc<dyn SpeechToText>>,
    loader: EngineLoader,
}

impl SharedEngine {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn SpeechToText>> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            loader: Box::new(loader),
        }
    }

    /// The engine, loading it if needed. A failed load is retried on the next call.
    pub async fn get(&self) -> Result<&Arc<dyn SpeechToText>> {
        self.cell.get_or_try_init(|| async { (self.loader)() }).await
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

#[async_trait]
impl SpeechToText for SharedEngine {
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Vec<Segment>> {
        self.get().await?.transcribe(audio_path, language).await
    }

    async fn check_availability(&self) -> Result<()> {
        self.get().await?.check_availability().await
    }
}

/// Factory for creating engines from configuration
pub struct EngineFactory;

impl EngineFactory {
    pub fn create(config: &TranscriberConfig) -> Arc<dyn SpeechToText> {
        match config.backend {
            TranscriberBackend::WhisperCli => Arc::new(WhisperCliEngine::new(config.clone())),
            TranscriberBackend::Remote => Arc::new(RemoteEngine::new(config)),
        }
    }

    /// Lazily built engine for the configured backend
    pub fn shared(config: TranscriberConfig) -> Arc<SharedEngine> {
        Arc::new(SharedEngine::new(move || {
            info!("Loading {:?} transcription engine (model {})", config.backend, config.model);
            Ok(Self::create(&config))
        }))
    }
}
