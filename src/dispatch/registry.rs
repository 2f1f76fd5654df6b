use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::{TaskKind, UnitOfWork};
use crate::error::{FailureKind, Result, SubburnError};

/// Result of running one unit of work
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Subtitle written, job is `transcribed`
    Transcribed { subtitle_path: PathBuf, segments: usize },
    /// Output written, job is `completed`
    Completed { output_path: PathBuf },
    /// Nothing to do, e.g. a redelivered unit whose job already moved on
    Skipped { reason: String },
    Failed { kind: FailureKind, message: String },
}

impl Outcome {
    pub fn failed(error: &SubburnError) -> Self {
        Outcome::Failed {
            kind: error.kind(),
            message: error.public_message(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// Executes units of one kind. Failures are reported through [`Outcome`],
/// never as an error.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, unit: &UnitOfWork) -> Outcome;

    /// Give up on a unit that ran out of time or attempts
    async fn abandon(&self, unit: &UnitOfWork, reason: &str);
}

/// Maps each task kind to its handler
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn with(mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    pub fn resolve(&self, kind: TaskKind) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| SubburnError::Queue(format!("no handler registered for {} tasks", kind)))
    }
}
