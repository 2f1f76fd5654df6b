use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::error::{Result, SubburnError};

/// One timed subtitle block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    /// Offset in seconds
    pub start: f64,
    /// Offset in seconds
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            index: 0,
            start,
            end,
            text: text.into(),
        }
    }
}

/// Serialize segments to SRT text. Blocks are renumbered from 1 in order.
pub fn serialize(segments: &[Segment]) -> String {
    let mut srt_content = String::new();

    for (index, segment) in segments.iter().enumerate() {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_timestamp(segment.start),
            format_timestamp(segment.end),
            segment.text.trim()
        ));
    }

    srt_content
}

/// Parse SRT text back into segments
pub fn parse(content: &str) -> Result<Vec<Segment>> {
    let normalized = content.replace("\r\n", "\n");
    let mut segments = Vec::new();

    for block in normalized.split("\n\n") {
        let mut lines = block.lines().skip_while(|line| line.trim().is_empty());

        let Some(index_line) = lines.next() else {
            continue;
        };
        let index = index_line.trim().parse::<usize>().map_err(|_| {
            SubburnError::InvalidRequest(format!("Invalid subtitle index: {}", index_line.trim()))
        })?;

        let timing = lines.next().ok_or_else(|| {
            SubburnError::InvalidRequest(format!("Subtitle block {} has no timing line", index))
        })?;
        let (start, end) = timing.split_once("-->").ok_or_else(|| {
            SubburnError::InvalidRequest(format!("Invalid timing line: {}", timing.trim()))
        })?;

        let text = lines.collect::<Vec<_>>().join("\n");

        let (start, end) = (parse_timestamp(start)?, parse_timestamp(end)?);
        if start >= end {
            return Err(SubburnError::InvalidRequest(format!(
                "Subtitle block {} ends before it starts: {}",
                index,
                timing.trim()
            )));
        }

        segments.push(Segment { index, start, end, text });
    }

    Ok(segments)
}

/// Generate SRT subtitle file from segments
pub async fn write_srt<P: AsRef<Path>>(segments: &[Segment], output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Generating SRT file: {}", output_path.display());

    fs::write(output_path, serialize(segments)).await?;

    info!("SRT file generated with {} blocks", segments.len());
    Ok(())
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm), truncating below the millisecond
pub fn format_timestamp(seconds: f64) -> String {
    let total_milliseconds = (seconds.max(0.0) * 1000.0) as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too) into seconds
pub fn parse_timestamp(value: &str) -> Result<f64> {
    let value = value.trim();
    let invalid = || SubburnError::InvalidRequest(format!("Invalid timestamp: {}", value));

    let (clock, millis) = value
        .split_once(',')
        .or_else(|| value.split_once('.'))
        .ok_or_else(invalid)?;

    let parts = clock
        .split(':')
        .map(|part| part.parse::<u64>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>>>()?;
    let [hours, minutes, secs] = parts[..] else {
        return Err(invalid());
    };
    let millis = millis.parse::<u64>().map_err(|_| invalid())?;

    let total = hours * 3_600_000 + minutes * 60_000 + secs * 1_000 + millis;
    Ok(total as f64 / 1000.0)
}
