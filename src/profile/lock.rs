//! Cross-process write exclusion, keyed by a lock file.
//!
//! Two strategies implement one [`ProfileLock`] interface and are selected
//! once at startup from [`Capabilities`]:
//!
//! - [`FlockLock`]: a non-blocking exclusive advisory lock polled with a fixed
//!   short sleep until the caller's timeout elapses.
//! - [`CreateLock`]: create-exclusive lock-file semantics for filesystems
//!   without advisory locks, retried with jittered exponential backoff; the
//!   bounded attempt count substitutes for a wall-clock timeout.
//!
//! Both tolerate double release (second call is a no-op) and leave no lock
//! file behind after a clean release. A failed acquire holds nothing.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use rand::Rng;

use crate::profile::capabilities::Capabilities;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const BACKOFF_BASE_MS: u64 = 25;
const BACKOFF_CAP_MS: u64 = 400;
const MAX_CREATE_ATTEMPTS: u64 = 40;

pub trait ProfileLock {
    /// Attempts to take the exclusive lock, blocking up to `timeout`.
    /// `Ok(false)` means contention outlasted the budget; hard I/O faults are
    /// `Err`. Either way, nothing is held afterwards unless `Ok(true)`.
    fn acquire(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Idempotent; a no-op when the lock was never acquired.
    fn release(&mut self);
}

/// Picks the lock strategy for the probed capabilities.
pub(crate) fn strategy_for(caps: &Capabilities, path: PathBuf) -> Box<dyn ProfileLock + Send> {
    if caps.advisory_locks {
        Box::new(FlockLock::new(path))
    } else {
        Box::new(CreateLock::new(path))
    }
}

/// Advisory-lock strategy: `flock` the lock file, polling non-blocking.
pub struct FlockLock {
    path: PathBuf,
    handle: Option<File>,
}

impl FlockLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), handle: None }
    }
}

impl ProfileLock for FlockLock {
    fn acquire(&mut self, timeout: Duration) -> io::Result<bool> {
        let start = Instant::now();
        loop {
            // Re-opened every attempt: the holder deletes the file on release,
            // so a cached handle could lock a dead inode.
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    self.handle = Some(file);
                    return Ok(true);
                }
                Err(e) if is_contended(&e) => {
                    if start.elapsed() >= timeout {
                        return Ok(false);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn release(&mut self) {
        if let Some(file) = self.handle.take() {
            let _ = file.unlock();
            drop(file);
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl Drop for FlockLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Create-exclusive strategy: the lock file's existence is the lock.
pub struct CreateLock {
    path: PathBuf,
    handle: Option<File>,
}

impl CreateLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), handle: None }
    }
}

impl ProfileLock for CreateLock {
    fn acquire(&mut self, timeout: Duration) -> io::Result<bool> {
        let attempts = (timeout.as_millis() as u64 / BACKOFF_BASE_MS).clamp(1, MAX_CREATE_ATTEMPTS);
        let mut delay = BACKOFF_BASE_MS;

        for attempt in 1..=attempts {
            match OpenOptions::new().write(true).create_new(true).open(&self.path) {
                Ok(file) => {
                    self.handle = Some(file);
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if attempt == attempts {
                        return Ok(false);
                    }
                    let jitter = rand::rng().random_range(0..=delay / 2);
                    thread::sleep(Duration::from_millis(delay + jitter));
                    delay = (delay * 2).min(BACKOFF_CAP_MS);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    fn release(&mut self) {
        if self.handle.take().is_some() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl Drop for CreateLock {
    fn drop(&mut self) {
        self.release();
    }
}
