use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, error};

use super::Resolution;
use crate::error::{Result, SubburnError};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Set encoder preset
    pub fn preset<S: Into<String>>(self, preset: S) -> Self {
        self.arg("-preset").arg(preset)
    }

    /// Limit encoder threads
    pub fn threads(self, threads: u32) -> Self {
        self.arg("-threads").arg(threads.to_string())
    }

    /// Execute the command and capture its output.
    ///
    /// A missing binary is reported as [`SubburnError::ToolMissing`], a non-zero
    /// exit as [`SubburnError::EncodeFailed`] carrying the exit code and stderr.
    /// The child is killed if the returned future is dropped.
    pub async fn execute(&self) -> Result<Output> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SubburnError::ToolMissing {
                    tool: self.binary_path.clone(),
                },
                _ => SubburnError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                "{} failed with exit code {:?}: {}",
                self.description,
                output.status.code(),
                stderr
            );
            return Err(SubburnError::EncodeFailed {
                operation: self.description.clone(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(output)
    }
}

/// Builder for the commands the pipeline runs
pub struct MediaCommandBuilder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S1: Into<String>, S2: Into<String>>(ffmpeg_path: S1, ffprobe_path: S2) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Build duration probe command; prints the duration as a bare float
    pub fn probe_duration<P: AsRef<Path>>(&self, path: P) -> MediaCommand {
        MediaCommand::new(&self.ffprobe_path, "Duration probe")
            .args(["-v", "error"])
            .args(["-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .output(path)
    }

    /// Build audio extraction command
    pub fn extract_audio<P: AsRef<Path>>(&self, video_path: P, audio_path: P) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Audio extraction")
            .input(video_path)
            .overwrite()
            .output(audio_path)
    }

    /// Build subtitle burn command
    pub fn burn_subtitles<P: AsRef<Path>>(
        &self,
        video_path: P,
        subtitle_path: P,
        resolution: &Resolution,
        output_path: P,
        preset: &str,
        threads: u32,
    ) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Subtitle burn")
            .input(video_path)
            .overwrite()
            .video_filter(burn_filter_chain(subtitle_path.as_ref(), resolution))
            .preset(preset)
            .threads(threads)
            .output(output_path)
    }

    /// Build version check command
    pub fn version_check(&self, binary: &str) -> MediaCommand {
        MediaCommand::new(binary, "Version check").arg("-version")
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    pub fn ffprobe_path(&self) -> &str {
        &self.ffprobe_path
    }
}

/// Escape a path for use inside a filter argument: backslashes become forward
/// slashes and colons are escaped for the filter grammar.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").replace(':', "\\:")
}

/// Subtitle overlay first, then the optional scale-and-pad stage
pub fn burn_filter_chain(subtitle_path: &Path, resolution: &Resolution) -> String {
    let mut filters = vec![format!("subtitles='{}'", escape_filter_path(subtitle_path))];

    if let Resolution::Fixed { width, height } = resolution {
        filters.push(format!(
            "scale={w}x{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            w = width,
            h = height
        ));
    }

    filters.join(",")
}
