use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{JobEvent, JobId, JobRecord, JobStatus, OwnerId};
use crate::error::{Result, SubburnError};
use crate::storage::{LockFile, write_atomic};

/// Persistence of job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new record; fails if the id is already taken
    async fn insert(&self, record: &JobRecord) -> Result<()>;

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>>;

    /// Apply `event` to the stored record as one read-modify-write and return
    /// the updated record
    async fn transition(&self, id: &JobId, event: &JobEvent) -> Result<JobRecord>;

    /// Record owned by `owner`; a record owned by anyone else is reported as
    /// missing
    async fn get_owned(&self, id: &JobId, owner: &OwnerId) -> Result<JobRecord> {
        match self.get(id).await? {
            Some(record) if &record.owner == owner => Ok(record),
            _ => Err(SubburnError::NotFound(id.to_string())),
        }
    }

    /// Fail a job with the event matching its stage. Returns `None` when the
    /// job is missing or in a status no failure event applies to.
    async fn fail(&self, id: &JobId, message: &str) -> Result<Option<JobRecord>> {
        let event = match self.get(id).await?.map(|record| record.status) {
            Some(JobStatus::Pending) => JobEvent::TranscriptionFailed {
                error: message.to_string(),
            },
            Some(JobStatus::Burning) => JobEvent::BurnFailed {
                error: message.to_string(),
            },
            _ => return Ok(None),
        };

        match self.transition(id, &event).await {
            Ok(record) => Ok(Some(record)),
            Err(SubburnError::WrongState(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// One JSON file per record. Writers also hold `.{id}.lock` so processes
/// sharing the directory serialize their updates of one record.
pub struct FileJobStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileJobStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn lock_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!(".{}.lock", id))
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn read(&self, id: &JobId) -> Result<Option<JobRecord>> {
        match tokio::fs::read(self.record_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, record: &JobRecord) -> Result<()> {
        write_atomic(&self.record_path(&record.id), &serde_json::to_vec_pretty(record)?).await
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn insert(&self, record: &JobRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let _file_lock = LockFile::acquire(self.lock_path(&record.id)).await?;

        if self.read(&record.id).await?.is_some() {
            return Err(SubburnError::InvalidRequest(format!(
                "job {} already exists",
                record.id
            )));
        }
        self.write(record).await?;
        debug!("Stored job {} for {}", record.id, record.owner);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>> {
        self.read(id).await
    }

    async fn transition(&self, id: &JobId, event: &JobEvent) -> Result<JobRecord> {
        let _guard = self.lock.lock().await;
        let _file_lock = LockFile::acquire(self.lock_path(id)).await?;

        let mut record = self
            .read(id)
            .await?
            .ok_or_else(|| SubburnError::NotFound(id.to_string()))?;
        let previous = record.status;
        record.apply(event)?;
        self.write(&record).await?;

        info!("Job {}: {} -> {}", id, previous, record.status);
        Ok(record)
    }
}
