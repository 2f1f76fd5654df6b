//! Subburn - Upload-to-Burned-Subtitles Video Pipeline
//!
//! Uploaded videos are transcribed into an editable SRT track with whisper,
//! and the edited track is burned into the video with ffmpeg. Both stages run
//! as durable background units of work.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod media;
pub mod pipeline;
pub mod quota;
pub mod service;
pub mod storage;
pub mod subtitle;
pub mod transcribe;
pub mod workflow;
