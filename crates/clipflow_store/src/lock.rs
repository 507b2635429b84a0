//! Per-job mutual exclusion.
//!
//! The lock token is a directory; `mkdir` is the atomic test-and-set. A
//! busy lock means another controller owns the job and the caller should
//! exit successfully. Release is best-effort and runs on drop so every exit
//! path gives the lock back.

use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Held lock for one job. Dropping releases it.
#[derive(Debug)]
pub struct JobLock {
    dir: PathBuf,
}

impl JobLock {
    /// Try to take the lock. `Ok(None)` means another instance holds it.
    pub fn try_acquire(lock_dir: &Path) -> Result<Option<JobLock>, StoreError> {
        match fs::create_dir(lock_dir) {
            Ok(()) => Ok(Some(JobLock { dir: lock_dir.to_path_buf() })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(StoreError::fs(lock_dir, e)),
        }
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir(&self.dir) {
            warn!(lock = %self.dir.display(), error = %e, "failed to release job lock");
        }
    }
}
