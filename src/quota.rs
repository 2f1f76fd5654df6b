//! Owner limits and the per-day usage ledger.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::job::OwnerId;
use crate::storage::{LockFile, write_atomic};

/// Limits supplied by the identity service for one owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerLimits {
    pub max_duration_minutes: u32,
    /// `None` means unlimited
    #[serde(default)]
    pub max_daily_tries: Option<u32>,
}

impl OwnerLimits {
    pub fn max_duration_seconds(&self) -> f64 {
        f64::from(self.max_duration_minutes) * 60.0
    }

    pub fn exceeds_duration(&self, duration_seconds: f64) -> bool {
        duration_seconds > self.max_duration_seconds()
    }
}

/// Videos processed by one owner on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub date: NaiveDate,
    pub videos_processed: u32,
}

/// Try counter of an owner with a finite quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryCounter {
    pub daily_tries_count: u32,
    pub last_try_date: NaiveDate,
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Successful tries counted against the owner's quota today
    async fn tries_today(&self, owner: &OwnerId, today: NaiveDate) -> Result<u32>;

    /// Record one completed video: create-or-increment the (owner, day) entry,
    /// and bump the try counter when the quota is finite
    async fn record_completion(&self, owner: &OwnerId, limits: &OwnerLimits, today: NaiveDate) -> Result<()>;

    /// Usage entries ordered by date
    async fn usage_history(&self, owner: &OwnerId) -> Result<Vec<UsageEntry>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    usage: BTreeMap<String, BTreeMap<NaiveDate, u32>>,
    #[serde(default)]
    tries: BTreeMap<String, TryCounter>,
}

/// Ledger kept in a single JSON file.
///
/// Updates hold both an in-process mutex and `{path}.lock`, so several
/// processes may share one ledger file.
pub struct FileUsageLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileUsageLedger {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    async fn load(&self) -> Result<LedgerFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LedgerFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, ledger: &LedgerFile) -> Result<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(ledger)?).await
    }
}

#[async_trait]
impl UsageLedger for FileUsageLedger {
    async fn tries_today(&self, owner: &OwnerId, today: NaiveDate) -> Result<u32> {
        let _guard = self.lock.lock().await;
        let ledger = self.load().await?;

        // A counter from an earlier day no longer counts
        Ok(ledger
            .tries
            .get(owner.as_str())
            .filter(|counter| counter.last_try_date == today)
            .map_or(0, |counter| counter.daily_tries_count))
    }

    async fn record_completion(&self, owner: &OwnerId, limits: &OwnerLimits, today: NaiveDate) -> Result<()> {
        let _guard = self.lock.lock().await;
        let _file_lock = LockFile::acquire(self.lock_path()).await?;
        let mut ledger = self.load().await?;

        *ledger
            .usage
            .entry(owner.to_string())
            .or_default()
            .entry(today)
            .or_insert(0) += 1;

        if limits.max_daily_tries.is_some() {
            let counter = ledger.tries.entry(owner.to_string()).or_insert(TryCounter {
                daily_tries_count: 0,
                last_try_date: today,
            });
            if counter.last_try_date != today {
                counter.daily_tries_count = 0;
            }
            counter.daily_tries_count += 1;
            counter.last_try_date = today;
        }

        self.store(&ledger).await?;
        debug!("Recorded completed video for {} on {}", owner, today);
        Ok(())
    }

    async fn usage_history(&self, owner: &OwnerId) -> Result<Vec<UsageEntry>> {
        let _guard = self.lock.lock().await;
        let ledger = self.load().await?;

        Ok(ledger
            .usage
            .get(owner.as_str())
            .map(|days| {
                days.iter()
                    .map(|(date, count)| UsageEntry {
                        date: *date,
                        videos_processed: *count,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    const LIMITED: OwnerLimits = OwnerLimits {
        max_duration_minutes: 1,
        max_daily_tries: Some(2),
    };

    #[test]
    fn test_duration_boundary() {
        assert!(!LIMITED.exceeds_duration(60.0));
        assert!(LIMITED.exceeds_duration(60.001));
        assert!(!LIMITED.exceeds_duration(30.0));
    }

    #[tokio::test]
    async fn test_record_completion_creates_then_increments() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FileUsageLedger::new(dir.path().join("usage.json"));
        let owner = OwnerId::from("alice");

        ledger.record_completion(&owner, &LIMITED, day(14)).await.unwrap();
        ledger.record_completion(&owner, &LIMITED, day(14)).await.unwrap();
        ledger.record_completion(&owner, &LIMITED, day(15)).await.unwrap();

        let history = ledger.usage_history(&owner).await.unwrap();
        assert_eq!(
            history,
            vec![
                UsageEntry { date: day(14), videos_processed: 2 },
                UsageEntry { date: day(15), videos_processed: 1 },
            ]
        );
        assert_eq!(ledger.tries_today(&owner, day(15)).await.unwrap(), 1);
        assert_eq!(ledger.tries_today(&owner, day(16)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unlimited_owner_has_no_try_counter() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FileUsageLedger::new(dir.path().join("usage.json"));
        let owner = OwnerId::from("bob");
        let unlimited = OwnerLimits { max_duration_minutes: 60, max_daily_tries: None };

        ledger.record_completion(&owner, &unlimited, day(14)).await.unwrap();

        assert_eq!(ledger.tries_today(&owner, day(14)).await.unwrap(), 0);
        assert_eq!(ledger.usage_history(&owner).await.unwrap().len(), 1);
        assert!(ledger.usage_history(&OwnerId::from("carol")).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ledgers_sharing_a_file_count_every_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");
        let first = Arc::new(FileUsageLedger::new(&path));
        let second = Arc::new(FileUsageLedger::new(&path));
        let owner = OwnerId::from("alice");
        let limits = OwnerLimits { max_duration_minutes: 1, max_daily_tries: Some(100) };

        let mut handles = Vec::new();
        for ledger in [first.clone(), second.clone()] {
            for _ in 0..20 {
                let ledger = ledger.clone();
                let owner = owner.clone();
                handles.push(tokio::spawn(async move {
                    ledger.record_completion(&owner, &limits, day(14)).await
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(
            first.usage_history(&owner).await.unwrap(),
            vec![UsageEntry { date: day(14), videos_processed: 40 }]
        );
        assert_eq!(second.tries_today(&owner, day(14)).await.unwrap(), 40);
        assert!(!dir.path().join("usage.json.lock").exists());
    }
}
