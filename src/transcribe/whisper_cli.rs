// Local whisper command-line engine
// Runs `whisper` with JSON output into a scratch directory and maps the result

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::SpeechToText;
use super::common::parse_whisper_json;
use crate::config::TranscriberConfig;
use crate::error::{Result, SubburnError};
use crate::subtitle::Segment;

pub struct WhisperCliEngine {
    config: TranscriberConfig,
}

impl WhisperCliEngine {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, audio_path: &Path, output_dir: &Path, language: Option<&str>) -> Vec<String> {
        let mut args = vec![
            audio_path.to_string_lossy().to_string(),
            "--model".to_string(),
            self.config.model.clone(),
            "--beam_size".to_string(),
            self.config.beam_size.to_string(),
            "--output_dir".to_string(),
            output_dir.to_string_lossy().to_string(),
            "--output_format".to_string(),
            "json".to_string(),
            "--verbose".to_string(),
            "False".to_string(),
        ];

        if let Some(lang) = language {
            args.push("--language".to_string());
            args.push(lang.to_string());
        }
        args
    }
}

#[async_trait]
impl SpeechToText for WhisperCliEngine {
    /// Check that the whisper command can be executed
    async fn check_availability(&self) -> Result<()> {
        let status = Command::new(&self.config.binary_path)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|_| SubburnError::ToolMissing {
                tool: self.config.binary_path.clone(),
            })?;

        if !status.success() {
            return Err(SubburnError::Transcriber(format!(
                "{} --help exited with {}",
                self.config.binary_path, status
            )));
        }
        info!("whisper command-line tool is available");
        Ok(())
    }

    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Vec<Segment>> {
        debug!("Executing whisper transcription with model: {}", self.config.model);

        let temp_dir = tempfile::tempdir()
            .map_err(|e| SubburnError::Transcriber(format!("Failed to create temp directory: {}", e)))?;
        let output_dir = temp_dir.path();

        let output = Command::new(&self.config.binary_path)
            .args(self.build_args(audio_path, output_dir, language))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SubburnError::ToolMissing {
                    tool: self.config.binary_path.clone(),
                },
                _ => SubburnError::Transcriber(format!("Failed to execute whisper command: {}", e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("whisper failed with {}: {}", output.status, stderr.trim());
            return Err(SubburnError::Transcriber(format!(
                "whisper exited with code {}",
                output.status.code().map_or_else(|| "none".to_string(), |c| c.to_string())
            )));
        }

        // The output file is named after the input stem
        let audio_stem = audio_path
            .file_stem()
            .ok_or_else(|| SubburnError::Transcriber("Invalid audio filename".to_string()))?;
        let json_file = output_dir.join(format!("{}.json", audio_stem.to_string_lossy()));

        let json_content = tokio::fs::read_to_string(&json_file)
            .await
            .map_err(|e| SubburnError::Transcriber(format!("Whisper JSON output not readable: {}", e)))?;

        let segments = parse_whisper_json(&json_content)?;
        info!("whisper transcription completed: {} segments", segments.len());
        Ok(segments)
    }
}
