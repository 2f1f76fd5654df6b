//! Task dispatcher: durable queue, handler registry and worker pool.

pub mod queue;
pub mod registry;
pub mod task;
pub mod worker;

pub use queue::{ClaimedTask, Envelope, LiveState, QueueStats, SpoolQueue};
pub use registry::{HandlerRegistry, Outcome, TaskHandler};
pub use task::{BurnTask, TaskId, TaskKind, TranscribeTask, UnitOfWork};
pub use worker::{Worker, WorkerPool, TIMEOUT_MESSAGE};
