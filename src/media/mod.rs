// Media toolchain adapter
//
// This module wraps the external media programs behind one trait:
// - Processor: ffprobe/ffmpeg backed implementation
// - Commands: command builders, filter chains and exit status mapping
// - Resolution: target frame size for the burn stage

pub mod commands;
pub mod processor;
pub mod resolution;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use commands::*;
pub use processor::*;
pub use resolution::Resolution;

use crate::config::MediaConfig;
use crate::error::Result;

/// Operations the pipeline needs from the media toolchain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Duration of a media file in seconds
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Extract the audio track of `video_path` into `audio_path`, overwriting it
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()>;

    /// Re-encode `video_path` with `subtitle_path` burned in
    async fn burn_subtitles(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        resolution: &Resolution,
        output_path: &Path,
    ) -> Result<()>;

    /// Check that the media programs can be executed
    async fn check_availability(&self) -> Result<()>;
}

/// Factory for creating media toolkit instances
pub struct MediaToolkitFactory;

impl MediaToolkitFactory {
    /// Create the default toolkit implementation (FFmpeg-based)
    pub fn create(config: MediaConfig) -> Arc<dyn MediaToolkit> {
        Arc::new(processor::FfmpegToolkit::new(config))
    }
}
