use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SubburnError};
use crate::subtitle::Segment;

/// JSON shape shared by the whisper CLI output file and the remote
/// `verbose_json` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperOutput {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub segments: Vec<WhisperSegment>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperSegment {
    #[serde(default)]
    pub id: Option<u64>,
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub avg_logprob: Option<f64>,
    #[serde(default)]
    pub no_speech_prob: Option<f64>,
}

/// Converts an engine specific result into subtitle segments
pub trait SegmentMapper<T> {
    fn to_segments(output: T) -> Result<Vec<Segment>>;
}

pub struct WhisperJsonMapper;

impl SegmentMapper<WhisperOutput> for WhisperJsonMapper {
    fn to_segments(output: WhisperOutput) -> Result<Vec<Segment>> {
        let total = output.segments.len();

        let segments: Vec<Segment> = output
            .segments
            .into_iter()
            .filter(|seg| seg.start.is_finite() && seg.end.is_finite() && seg.end > seg.start)
            .map(|seg| Segment::new(seg.start.max(0.0), seg.end, seg.text.trim()))
            .filter(|seg| !seg.text.is_empty())
            .collect();

        if segments.len() != total {
            debug!("Dropped {} empty or zero-length segments", total - segments.len());
        }
        debug!(
            "Mapped {} segments (language: {})",
            segments.len(),
            output.language.as_deref().unwrap_or("unknown")
        );
        Ok(segments)
    }
}

/// Parse whisper JSON text into segments
pub fn parse_whisper_json(content: &str) -> Result<Vec<Segment>> {
    let output: WhisperOutput = serde_json::from_str(content)
        .map_err(|e| SubburnError::Transcriber(format!("Failed to parse whisper JSON: {}", e)))?;
    WhisperJsonMapper::to_segments(output)
}
