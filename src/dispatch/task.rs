use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::job::{JobId, OwnerId};
use crate::media::Resolution;
use crate::quota::OwnerLimits;

/// Identifier of one enqueued unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Transcribe,
    Burn,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Transcribe => f.write_str("transcribe"),
            TaskKind::Burn => f.write_str("burn"),
        }
    }
}

/// Speech-to-text stage of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeTask {
    pub job_id: JobId,
    pub owner: OwnerId,
    pub video_path: PathBuf,
    pub filename: String,
    pub language: Option<String>,
    pub limits: OwnerLimits,
}

/// Burn-in stage of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnTask {
    pub job_id: JobId,
    pub owner: OwnerId,
    pub video_path: PathBuf,
    pub subtitle_path: PathBuf,
    pub filename: String,
    pub resolution: Resolution,
    pub limits: OwnerLimits,
}

/// A self-contained unit of work; everything a worker in another process
/// needs travels in the value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitOfWork {
    Transcribe(TranscribeTask),
    Burn(BurnTask),
}

impl UnitOfWork {
    pub fn kind(&self) -> TaskKind {
        match self {
            UnitOfWork::Transcribe(_) => TaskKind::Transcribe,
            UnitOfWork::Burn(_) => TaskKind::Burn,
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            UnitOfWork::Transcribe(task) => &task.job_id,
            UnitOfWork::Burn(task) => &task.job_id,
        }
    }

    pub fn owner(&self) -> &OwnerId {
        match self {
            UnitOfWork::Transcribe(task) => &task.owner,
            UnitOfWork::Burn(task) => &task.owner,
        }
    }
}
