//! Single-cycle-at-a-time guard for the global repository sync.
//!
//! Two layers: an in-process flag owned by the task instance, and an optional
//! flock on a file under the repository base so a one-shot CLI sync and a
//! running daemon on the same node also exclude each other. Neither layer
//! ever blocks; a busy guard means "skip this cycle".

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use fs2::FileExt;

/// Advisory exclusive lock on a file. Released when dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Try to acquire the lock without blocking.
    /// Returns None if the lock is held elsewhere.
    pub fn try_acquire(lock_path: &Path) -> io::Result<Option<Self>> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Non-blocking, non-reentrant guard owned by one sync task.
#[derive(Debug, Default)]
pub struct SyncGuard {
    busy: AtomicBool,
    lock_path: Option<PathBuf>,
}

/// Proof that the holder owns the guard. Dropping it releases the guard.
#[derive(Debug)]
pub struct SyncPermit<'a> {
    guard: &'a SyncGuard,
    _file: Option<FileLock>,
}

impl SyncGuard {
    /// Guard that only excludes callers within this process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard that additionally holds a flock on `lock_path` while acquired.
    pub fn with_lock_file(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            busy: AtomicBool::new(false),
            lock_path: Some(lock_path.into()),
        }
    }

    /// Acquire the guard if nobody holds it. Never waits.
    pub fn try_acquire(&self) -> Option<SyncPermit<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let file = match &self.lock_path {
            None => None,
            Some(path) => match FileLock::try_acquire(path) {
                Ok(Some(lock)) => Some(lock),
                Ok(None) => {
                    log::debug!("Sync lock {} is held by another process", path.display());
                    self.busy.store(false, Ordering::Release);
                    return None;
                }
                Err(e) => {
                    log::warn!("Failed to open sync lock {}: {}", path.display(), e);
                    self.busy.store(false, Ordering::Release);
                    return None;
                }
            },
        };

        Some(SyncPermit { guard: self, _file: file })
    }

    /// Whether a permit is currently outstanding in this process.
    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}
