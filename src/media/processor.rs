use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{MediaCommandBuilder, MediaToolkit, Resolution};
use crate::config::MediaConfig;
use crate::error::{Result, SubburnError};

/// FFmpeg-backed media toolkit
pub struct FfmpegToolkit {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl FfmpegToolkit {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.ffmpeg_path, &config.ffprobe_path);

        Self {
            config,
            command_builder,
        }
    }
}

/// Parse the probe's stdout into a duration in seconds
pub fn parse_probe_output(stdout: &str) -> Result<f64> {
    let value = stdout.trim();
    let duration = value
        .parse::<f64>()
        .map_err(|_| SubburnError::NonMedia("Could not determine video duration".to_string()))?;

    if !duration.is_finite() || duration < 0.0 {
        return Err(SubburnError::NonMedia("Could not determine video duration".to_string()));
    }
    Ok(duration)
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        debug!("Probing duration of {}", path.display());

        let output = match self.command_builder.probe_duration(path).execute().await {
            Ok(output) => output,
            Err(SubburnError::EncodeFailed { stderr, .. }) => {
                warn!("ffprobe rejected {}: {}", path.display(), stderr);
                return Err(SubburnError::NonMedia(
                    "The uploaded file could not be read as a video".to_string(),
                ));
            }
            Err(e) => return Err(e),
        };

        let duration = parse_probe_output(&String::from_utf8_lossy(&output.stdout))?;
        debug!("Duration of {}: {:.2}s", path.display(), duration);
        Ok(duration)
    }

    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()> {
        info!("Extracting audio from {} to {}", video_path.display(), audio_path.display());

        self.command_builder
            .extract_audio(video_path, audio_path)
            .execute()
            .await?;

        info!("Audio extraction completed");
        Ok(())
    }

    async fn burn_subtitles(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        resolution: &Resolution,
        output_path: &Path,
    ) -> Result<()> {
        info!(
            "Burning subtitles from {} into {} -> {} ({})",
            subtitle_path.display(),
            video_path.display(),
            output_path.display(),
            resolution
        );

        let command = self.command_builder.burn_subtitles(
            video_path,
            subtitle_path,
            resolution,
            output_path,
            &self.config.preset,
            self.config.threads,
        );
        info!("Running FFmpeg burn command: {} {}", command.binary_path, command.args.join(" "));
        command.execute().await?;

        info!("Subtitle burn completed successfully");
        Ok(())
    }

    async fn check_availability(&self) -> Result<()> {
        for binary in [self.command_builder.ffmpeg_path(), self.command_builder.ffprobe_path()] {
            self.command_builder.version_check(binary).execute().await?;
            info!("{} is available", binary);
        }
        Ok(())
    }
}
