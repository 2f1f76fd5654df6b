use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{HandlerRegistry, Outcome, SpoolQueue};
use crate::config::DispatcherConfig;
use crate::error::{FailureKind, Result};

/// Message recorded on jobs whose unit exceeded its time budget
pub const TIMEOUT_MESSAGE: &str = "Processing took too long and was stopped";

/// Claims units one at a time and runs them to completion
pub struct Worker {
    id: String,
    queue: Arc<SpoolQueue>,
    registry: Arc<HandlerRegistry>,
    job_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<SpoolQueue>,
        registry: Arc<HandlerRegistry>,
        job_timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            registry,
            job_timeout,
        }
    }

    /// Claim and run the next unit. `None` when the queue is empty.
    pub async fn process_next(&self) -> Result<Option<Outcome>> {
        let Some(claimed) = self.queue.claim(&self.id).await? else {
            return Ok(None);
        };
        let kind = claimed.unit().kind();
        let job_id = *claimed.unit().job_id();

        let handler = match self.registry.resolve(kind) {
            Ok(handler) => handler,
            Err(e) => {
                error!("Worker {}: {}", self.id, e);
                let outcome = Outcome::failed(&e);
                self.queue.dead_letter(claimed, &e.to_string()).await?;
                return Ok(Some(outcome));
            }
        };

        info!(
            "Worker {} running {} for job {} of {}",
            self.id,
            kind,
            job_id,
            claimed.unit().owner()
        );

        // Dropping the handler future on timeout kills its child processes
        match tokio::time::timeout(self.job_timeout, handler.handle(claimed.unit())).await {
            Ok(outcome) => {
                debug!("Worker {} finished {} for job {}: {:?}", self.id, kind, job_id, outcome);
                self.queue.ack(&claimed).await?;
                Ok(Some(outcome))
            }
            Err(_) => {
                warn!(
                    "Worker {} abandoned {} for job {} after {:?}",
                    self.id, kind, job_id, self.job_timeout
                );
                handler.abandon(claimed.unit(), TIMEOUT_MESSAGE).await;
                self.queue.dead_letter(claimed, "timed out").await?;
                Ok(Some(Outcome::Failed {
                    kind: FailureKind::Abandoned,
                    message: TIMEOUT_MESSAGE.to_string(),
                }))
            }
        }
    }

    /// Process units until the queue is empty, returning how many ran
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.process_next().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    async fn run(self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.queue.register_worker(&self.id).await {
            warn!("Worker {} could not register: {}", self.id, e);
        }
        info!("Worker {} started", self.id);

        while !*shutdown.borrow() {
            let idle = match self.process_next().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!("Worker {} queue error: {}", self.id, e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        self.queue.unregister_worker(&self.id).await;
        info!("Worker {} stopped", self.id);
    }
}

/// A fixed set of workers plus a reaper for stale running entries
pub struct WorkerPool {
    queue: Arc<SpoolQueue>,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
}

impl WorkerPool {
    pub fn new(queue: Arc<SpoolQueue>, registry: Arc<HandlerRegistry>, config: DispatcherConfig) -> Self {
        Self {
            queue,
            registry,
            config,
        }
    }

    /// Worker sharing this pool's queue and handlers
    pub fn worker(&self, id: impl Into<String>) -> Worker {
        Worker::new(
            id,
            self.queue.clone(),
            self.registry.clone(),
            self.config.job_timeout(),
        )
    }

    /// Run `workers` workers and the reaper until `shutdown` turns true.
    /// Units in flight finish before this returns.
    pub async fn run(&self, workers: usize, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.queue.init().await?;
        let workers = workers.max(1);
        let prefix = Uuid::new_v4().simple().to_string();
        info!(
            "Starting {} workers (timeout {:?}, max attempts {})",
            workers,
            self.config.job_timeout(),
            self.config.max_attempts
        );

        let mut tasks = JoinSet::new();
        for index in 0..workers {
            let worker = self.worker(format!("{}-{}", &prefix[..8], index));
            tasks.spawn(worker.run(self.config.poll_interval(), shutdown.clone()));
        }
        tasks.spawn(reap_loop(
            self.queue.clone(),
            self.registry.clone(),
            self.config.clone(),
            shutdown,
        ));

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Dispatcher task panicked: {}", e);
            }
        }
        info!("All workers stopped");
        Ok(())
    }
}

async fn reap_loop(
    queue: Arc<SpoolQueue>,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    // Workers time out on their own; only entries left behind by a dead
    // process outlive the budget plus one reap interval
    let stale_after = config.job_timeout() + config.reap_interval();
    let mut interval = tokio::time::interval(config.reap_interval().max(Duration::from_millis(100)));

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                match queue.reap_stale(Utc::now(), stale_after, config.max_attempts).await {
                    Ok(abandoned) => {
                        for envelope in abandoned {
                            match registry.resolve(envelope.unit.kind()) {
                                Ok(handler) => handler.abandon(&envelope.unit, TIMEOUT_MESSAGE).await,
                                Err(e) => warn!("Cannot abandon task {}: {}", envelope.task_id, e),
                            }
                        }
                    }
                    Err(e) => warn!("Failed to reap stale tasks: {}", e),
                }
            }
        }
    }
}
