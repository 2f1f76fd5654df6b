//! Upload directory layout and small filesystem helpers.
//!
//! Every path derived here is scoped by a random prefix or a job id, so two
//! live jobs never share a file.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::job::JobId;

/// Prefix of burned output files
pub const OUTPUT_PREFIX: &str = "subtitled_";

#[derive(Debug, Clone)]
pub struct UploadLayout {
    upload_dir: PathBuf,
}

impl UploadLayout {
    pub fn new<P: Into<PathBuf>>(upload_dir: P) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub async fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.upload_dir).await?;
        Ok(())
    }

    /// `{32 hex}_{filename}`
    pub fn original_video_path(&self, filename: &str) -> PathBuf {
        self.upload_dir
            .join(format!("{}_{}", Uuid::new_v4().simple(), filename))
    }

    /// `{job_id}_{stem}.srt`; deterministic so a re-run overwrites
    pub fn subtitle_path(&self, job_id: &JobId, filename: &str) -> PathBuf {
        self.upload_dir
            .join(format!("{}_{}.srt", job_id, file_stem(filename)))
    }

    /// `{job_id}/subtitled_{filename}`
    pub fn output_video_path(&self, job_id: &JobId, filename: &str) -> PathBuf {
        self.upload_dir
            .join(job_id.to_string())
            .join(format!("{}{}", OUTPUT_PREFIX, filename))
    }

    /// `.scratch-{job_id}`; working directory for intermediate audio
    pub fn scratch_dir(&self, job_id: &JobId) -> PathBuf {
        self.upload_dir.join(format!(".scratch-{}", job_id))
    }

    /// Reference handed to clients for a path inside the upload dir
    pub fn public_reference(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.upload_dir)
            .ok()
            .map(|relative| relative.to_string_lossy().replace('\\', "/"))
    }
}

/// Stem of a filename; the whole name when it has no extension
pub fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string())
}

/// Reduce a user supplied filename to a safe ASCII basename.
///
/// Path components are dropped, whitespace becomes `_`, anything outside
/// `[A-Za-z0-9._-]` is removed and leading dots are stripped. Returns `None`
/// when nothing usable remains.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let basename = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let cleaned: String = basename
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    let cleaned = cleaned.trim_start_matches(['.', '_']).to_string();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Write through a sibling temp file and rename over the target
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    fs::write(&temp_path, contents).await?;
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

/// Best-effort removal; a file that is already gone is not an error
pub async fn remove_if_exists(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

/// Remove a directory if it is empty
pub async fn remove_dir_if_empty(path: &Path) {
    if let Err(e) = fs::remove_dir(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Left directory {} in place: {}", path.display(), e);
        }
    }
}

/// A lock file held for a read-modify-write across processes.
///
/// Acquired by creating the file exclusively; released on drop. A lock file
/// older than `LOCK_STALE_AFTER` is treated as left behind by a dead holder.
pub struct LockFile {
    path: PathBuf,
}

const LOCK_RETRY: Duration = Duration::from_millis(5);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

impl LockFile {
    pub async fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path).await {
                        warn!("Breaking stale lock {}", path.display());
                        let _ = fs::remove_file(&path).await;
                        continue;
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    let parent = path.parent().unwrap_or_else(|| Path::new("."));
                    fs::create_dir_all(parent).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn is_stale(path: &Path) -> bool {
        let modified = match fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > LOCK_STALE_AFTER)
            .unwrap_or(false)
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to release lock {}: {}", self.path.display(), e);
            }
        }
    }
}

/// A scratch directory removed when the guard goes away, whatever the outcome
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create `path` empty; anything left there by an earlier attempt is removed first
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        remove_dir_all_if_exists(&path).await;
        fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove scratch dir {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Recursive best-effort removal of a directory
pub async fn remove_dir_all_if_exists(path: &Path) -> bool {
    match fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}
