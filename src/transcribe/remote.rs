//! OpenAI-compatible HTTP transcription endpoint.

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, error, info};

use super::SpeechToText;
use super::common::{SegmentMapper, WhisperJsonMapper, WhisperOutput};
use crate::config::TranscriberConfig;
use crate::error::{Result, SubburnError};
use crate::subtitle::Segment;

const TRANSCRIPTIONS_PATH: &str = "/v1/audio/transcriptions";

pub struct RemoteEngine {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl RemoteEngine {
    pub fn new(config: &TranscriberConfig) -> Self {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty());

        Self {
            client: reqwest::Client::new(),
            url: transcriptions_url(&config.endpoint),
            model: config.model.clone(),
            api_key,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Full endpoint URL; a base URL gets the standard path appended
pub fn transcriptions_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.ends_with(TRANSCRIPTIONS_PATH) {
        endpoint.to_string()
    } else {
        format!("{}{}", endpoint, TRANSCRIPTIONS_PATH)
    }
}

#[async_trait]
impl SpeechToText for RemoteEngine {
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Vec<Segment>> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();
        debug!("Uploading {} bytes to {}", bytes.len(), self.url);

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Transcription endpoint returned {}: {}", status, body);
            return Err(SubburnError::Transcriber(format!(
                "transcription endpoint returned {}",
                status
            )));
        }

        let output: WhisperOutput = response.json().await?;
        let segments = WhisperJsonMapper::to_segments(output)?;
        info!("Remote transcription completed: {} segments", segments.len());
        Ok(segments)
    }
}
