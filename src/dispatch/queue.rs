//! Durable spool queue on the local filesystem.
//!
//! Each entry is one JSON file. Its location encodes the state: `queued/`,
//! `running/` or `dead/`. File names are `{seq}_{job_id}_{task_id}.json`
//! with a zero padded enqueue timestamp as `seq`, so a directory listing
//! sorted by name is FIFO. Claiming renames the file from `queued/` to
//! `running/`; the rename succeeds for exactly one claimant, whichever
//! process it runs in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

use super::{TaskId, UnitOfWork};
use crate::error::{Result, SubburnError};
use crate::job::JobId;
use crate::storage::{remove_if_exists, write_atomic};

const QUEUED: &str = "queued";
const RUNNING: &str = "running";
const DEAD: &str = "dead";
const WORKERS: &str = "workers";

/// A unit of work plus its delivery bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub task_id: TaskId,
    pub unit: UnitOfWork,
    pub enqueued_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub worker: Option<String>,
    pub last_error: Option<String>,
}

/// An envelope owned by one worker until it is acked, requeued or dead-lettered
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub envelope: Envelope,
    file_name: String,
}

impl ClaimedTask {
    pub fn unit(&self) -> &UnitOfWork {
        &self.envelope.unit
    }

    pub fn task_id(&self) -> TaskId {
        self.envelope.task_id
    }
}

/// Dispatcher's view of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveState {
    Queued,
    Running,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub dead: usize,
    pub workers: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkerRegistration {
    worker: String,
    pid: u32,
    started_at: DateTime<Utc>,
}

pub struct SpoolQueue {
    root: PathBuf,
}

impl SpoolQueue {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn dir(&self, state: &str) -> PathBuf {
        self.root.join(state)
    }

    /// Create the state directories
    pub async fn init(&self) -> Result<()> {
        for state in [QUEUED, RUNNING, DEAD, WORKERS] {
            fs::create_dir_all(self.dir(state)).await?;
        }
        Ok(())
    }

    pub async fn enqueue(&self, unit: UnitOfWork) -> Result<TaskId> {
        self.enqueue_with_id(TaskId::new(), unit).await
    }

    /// Enqueue under a caller chosen task id
    pub async fn enqueue_with_id(&self, task_id: TaskId, unit: UnitOfWork) -> Result<TaskId> {
        self.init().await?;

        let enqueued_at = Utc::now();
        let seq = enqueued_at.timestamp_nanos_opt().unwrap_or_default().max(0);
        let file_name = format!("{:020}_{}_{}.json", seq, unit.job_id(), task_id);
        let kind = unit.kind();
        let job_id = *unit.job_id();

        let envelope = Envelope {
            task_id,
            unit,
            enqueued_at,
            claimed_at: None,
            attempts: 0,
            worker: None,
            last_error: None,
        };
        write_atomic(&self.dir(QUEUED).join(&file_name), &serde_json::to_vec_pretty(&envelope)?).await?;

        info!("Enqueued {} task {} for job {}", kind, task_id, job_id);
        Ok(task_id)
    }

    /// Claim the oldest queued entry, or `None` when the queue is empty
    pub async fn claim(&self, worker: &str) -> Result<Option<ClaimedTask>> {
        for file_name in self.list(QUEUED).await? {
            let from = self.dir(QUEUED).join(&file_name);
            let to = self.dir(RUNNING).join(&file_name);

            match fs::rename(&from, &to).await {
                Ok(()) => {}
                // Another worker won this entry
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            let mut envelope = match read_envelope(&to).await {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Unreadable queue entry {}: {}", file_name, e);
                    let _ = fs::rename(&to, self.dir(DEAD).join(&file_name)).await;
                    continue;
                }
            };
            envelope.claimed_at = Some(Utc::now());
            envelope.attempts += 1;
            envelope.worker = Some(worker.to_string());
            write_atomic(&to, &serde_json::to_vec_pretty(&envelope)?).await?;

            debug!(
                "Worker {} claimed task {} (attempt {})",
                worker, envelope.task_id, envelope.attempts
            );
            return Ok(Some(ClaimedTask {
                envelope,
                file_name,
            }));
        }
        Ok(None)
    }

    /// Finish a claimed entry
    pub async fn ack(&self, claimed: &ClaimedTask) -> Result<()> {
        if !remove_if_exists(&self.dir(RUNNING).join(&claimed.file_name)).await {
            warn!("Task {} was no longer running when acked", claimed.task_id());
        }
        Ok(())
    }

    /// Return a claimed entry to the queue for another delivery
    pub async fn requeue(&self, claimed: ClaimedTask, error: &str) -> Result<()> {
        self.move_running(claimed, QUEUED, error).await
    }

    /// Park a claimed entry in `dead/`
    pub async fn dead_letter(&self, claimed: ClaimedTask, error: &str) -> Result<()> {
        self.move_running(claimed, DEAD, error).await
    }

    async fn move_running(&self, mut claimed: ClaimedTask, target: &str, error: &str) -> Result<()> {
        let running = self.dir(RUNNING).join(&claimed.file_name);
        if target == QUEUED {
            claimed.envelope.claimed_at = None;
            claimed.envelope.worker = None;
        }
        claimed.envelope.last_error = Some(error.to_string());

        write_atomic(&running, &serde_json::to_vec_pretty(&claimed.envelope)?).await?;
        fs::rename(&running, self.dir(target).join(&claimed.file_name)).await?;

        info!("Task {} moved to {}: {}", claimed.task_id(), target, error);
        Ok(())
    }

    /// Recover running entries claimed longer than `older_than` ago.
    ///
    /// Entries with attempts left are requeued; the rest are dead-lettered
    /// and returned so their jobs can be abandoned.
    pub async fn reap_stale(
        &self,
        now: DateTime<Utc>,
        older_than: Duration,
        max_attempts: u32,
    ) -> Result<Vec<Envelope>> {
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|e| SubburnError::Queue(format!("invalid stale threshold: {}", e)))?;
        let mut abandoned = Vec::new();

        for file_name in self.list(RUNNING).await? {
            let path = self.dir(RUNNING).join(&file_name);
            let envelope = match read_envelope(&path).await {
                Ok(envelope) => envelope,
                // Acked or moved while scanning
                Err(SubburnError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            let Some(claimed_at) = envelope.claimed_at else {
                continue;
            };
            if now - claimed_at <= older_than {
                continue;
            }

            let attempts = envelope.attempts;
            let claimed = ClaimedTask {
                envelope,
                file_name,
            };
            if attempts < max_attempts {
                warn!(
                    "Requeueing stale task {} after attempt {}",
                    claimed.task_id(),
                    attempts
                );
                self.requeue(claimed, "worker did not finish in time").await?;
            } else {
                warn!(
                    "Dead-lettering stale task {} after {} attempts",
                    claimed.task_id(),
                    attempts
                );
                let envelope = claimed.envelope.clone();
                self.dead_letter(claimed, "attempts exhausted").await?;
                abandoned.push(envelope);
            }
        }
        Ok(abandoned)
    }

    /// Where the dispatcher currently holds work for `job_id`
    pub async fn live_state(&self, job_id: &JobId) -> Result<LiveState> {
        let marker = format!("_{}_", job_id);

        if self.list(RUNNING).await?.iter().any(|name| name.contains(&marker)) {
            return Ok(LiveState::Running);
        }
        if self.list(QUEUED).await?.iter().any(|name| name.contains(&marker)) {
            return Ok(LiveState::Queued);
        }
        Ok(LiveState::Unknown)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            queued: self.list(QUEUED).await?.len(),
            running: self.list(RUNNING).await?.len(),
            dead: self.list(DEAD).await?.len(),
            workers: self.list(WORKERS).await?.len(),
        })
    }

    /// Announce a live worker; counted by [`SpoolQueue::stats`]
    pub async fn register_worker(&self, worker: &str) -> Result<()> {
        let registration = WorkerRegistration {
            worker: worker.to_string(),
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        write_atomic(
            &self.dir(WORKERS).join(format!("{}.json", worker)),
            &serde_json::to_vec_pretty(&registration)?,
        )
        .await
    }

    pub async fn unregister_worker(&self, worker: &str) {
        remove_if_exists(&self.dir(WORKERS).join(format!("{}.json", worker))).await;
    }

    /// Entry file names in one state directory, sorted
    async fn list(&self, state: &str) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(self.dir(state)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

async fn read_envelope(path: &Path) -> Result<Envelope> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TranscribeTask;
    use crate::job::OwnerId;
    use crate::quota::OwnerLimits;

    fn unit(job_id: JobId) -> UnitOfWork {
        UnitOfWork::Transcribe(TranscribeTask {
            job_id,
            owner: OwnerId::from("alice"),
            video_path: PathBuf::from("uploads/abc_clip.mp4"),
            filename: "clip.mp4".to_string(),
            language: None,
            limits: OwnerLimits { max_duration_minutes: 1, max_daily_tries: Some(5) },
        })
    }

    #[tokio::test]
    async fn test_claim_is_fifo_and_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::new(dir.path());
        let first = JobId::new();
        let second = JobId::new();

        queue.enqueue(unit(first)).await.unwrap();
        queue.enqueue(unit(second)).await.unwrap();
        assert_eq!(queue.live_state(&first).await.unwrap(), LiveState::Queued);

        let claimed = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(claimed.unit().job_id(), &first);
        assert_eq!(claimed.envelope.attempts, 1);
        assert_eq!(queue.live_state(&first).await.unwrap(), LiveState::Running);

        let next = queue.claim("w2").await.unwrap().unwrap();
        assert_eq!(next.unit().job_id(), &second);
        assert!(queue.claim("w3").await.unwrap().is_none());

        queue.ack(&claimed).await.unwrap();
        assert_eq!(queue.live_state(&first).await.unwrap(), LiveState::Unknown);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats, QueueStats { queued: 0, running: 1, dead: 0, workers: 0 });
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_share_an_entry() {
        let dir = tempfile::tempdir().unwrap();
        let queue = std::sync::Arc::new(SpoolQueue::new(dir.path()));
        for _ in 0..8 {
            queue.enqueue(unit(JobId::new())).await.unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(task) = queue.claim(&format!("w{}", worker)).await.unwrap() {
                    claimed.push(task.task_id());
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 8);
        assert_eq!(unique.len(), 8);
    }

    #[tokio::test]
    async fn test_reap_requeues_then_dead_letters() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::new(dir.path());
        let job_id = JobId::new();
        queue.enqueue(unit(job_id)).await.unwrap();

        queue.claim("w1").await.unwrap().unwrap();
        let later = Utc::now() + chrono::Duration::seconds(120);

        let abandoned = queue.reap_stale(later, Duration::from_secs(60), 2).await.unwrap();
        assert!(abandoned.is_empty());
        assert_eq!(queue.live_state(&job_id).await.unwrap(), LiveState::Queued);

        let claimed = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(claimed.envelope.attempts, 2);
        assert_eq!(claimed.envelope.last_error.as_deref(), Some("worker did not finish in time"));

        let abandoned = queue.reap_stale(later, Duration::from_secs(60), 2).await.unwrap();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].unit.job_id(), &job_id);
        assert_eq!(queue.stats().await.unwrap().dead, 1);
    }

    #[tokio::test]
    async fn test_fresh_claims_are_not_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::new(dir.path());
        queue.enqueue(unit(JobId::new())).await.unwrap();
        queue.claim("w1").await.unwrap().unwrap();

        let abandoned = queue.reap_stale(Utc::now(), Duration::from_secs(60), 1).await.unwrap();
        assert!(abandoned.is_empty());
        assert_eq!(queue.stats().await.unwrap().running, 1);
    }

    #[tokio::test]
    async fn test_worker_registration_counts() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::new(dir.path());
        queue.init().await.unwrap();

        queue.register_worker("w1").await.unwrap();
        queue.register_worker("w2").await.unwrap();
        assert_eq!(queue.stats().await.unwrap().workers, 2);

        queue.unregister_worker("w1").await;
        assert_eq!(queue.stats().await.unwrap().workers, 1);
    }
}
