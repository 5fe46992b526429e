//! Clone eviction and disk accounting.
//!
//! Housekeeping only ever touches directories under `clones/`; the master
//! profile is out of bounds. Eviction combines an age threshold with a
//! rank-based capacity cap: a clone is removed when its age exceeds
//! `max_age`, or when it falls beyond the `max_count` youngest clones even
//! if it is young. A zero `max_age` disables the age rule so the capacity
//! cap can be exercised alone.

use std::fs;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::profile::context::ProfileContextManager;
use crate::profile::fsops;
use crate::profile::metadata::{now_rfc3339, CleanupStats};

const REMOVE_ATTEMPTS: u32 = 3;

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub cleaned: usize,
    pub remaining: usize,
    pub errors: usize,
    pub bytes_freed: u64,
}

/// Point-in-time store accounting.
#[derive(Debug, Clone, Serialize)]
pub struct DiskUsage {
    pub master_bytes: u64,
    pub clones_bytes: u64,
    pub clone_count: usize,
    pub last_cleanup: Option<CleanupStats>,
}

struct CloneEntry {
    path: std::path::PathBuf,
    age: Duration,
    size: u64,
}

pub struct Housekeeping<'a> {
    manager: &'a ProfileContextManager,
}

impl<'a> Housekeeping<'a> {
    pub fn new(manager: &'a ProfileContextManager) -> Self {
        Self { manager }
    }

    /// Evicts stale clones. Returns `None` when the store is disabled.
    pub fn cleanup_old_clones(
        &self,
        max_age: Duration,
        max_count: usize,
    ) -> Option<CleanupReport> {
        let layout = self.manager.layout()?;
        let clones = list_clones(&layout.clones_dir());

        let mut cleaned = 0usize;
        let mut errors = 0usize;
        let mut bytes_freed = 0u64;

        for (rank, clone) in clones.iter().enumerate() {
            let too_old = !max_age.is_zero() && clone.age > max_age;
            let over_capacity = rank >= max_count;
            if !too_old && !over_capacity {
                continue;
            }
            if fsops::remove_tree_with_retry(&clone.path, REMOVE_ATTEMPTS) {
                cleaned += 1;
                bytes_freed += clone.size;
            } else {
                log::warn!("could not evict clone at {}", clone.path.display());
                errors += 1;
            }
        }

        let remaining = clones.len() - cleaned;
        let report = CleanupReport { cleaned, remaining, errors, bytes_freed };

        if let Some(store) = self.manager.metadata_store() {
            let stats = CleanupStats {
                removed: cleaned,
                bytes_freed,
                remaining,
                at: now_rfc3339(),
            };
            if let Err(e) = store.update_metadata(|m| m.last_cleanup = Some(stats)) {
                log::warn!("could not record cleanup stats: {e}");
            }
        }

        Some(report)
    }

    /// Read-only accounting. Returns `None` when the store is disabled.
    pub fn disk_usage(&self) -> Option<DiskUsage> {
        let layout = self.manager.layout()?;
        let clones_dir = layout.clones_dir();

        let clone_count = fs::read_dir(&clones_dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().is_dir())
                    .count()
            })
            .unwrap_or(0);

        let last_cleanup = self
            .manager
            .metadata_store()
            .and_then(|s| s.read_metadata().ok())
            .and_then(|m| m.last_cleanup);

        Some(DiskUsage {
            master_bytes: fsops::dir_size(&layout.master_dir()),
            clones_bytes: fsops::dir_size(&clones_dir),
            clone_count,
            last_cleanup,
        })
    }
}

/// Clone directories sorted youngest first; among equal ages the larger clone
/// ranks first.
fn list_clones(clones_dir: &std::path::Path) -> Vec<CloneEntry> {
    let Ok(entries) = fs::read_dir(clones_dir) else {
        return Vec::new();
    };
    let now = SystemTime::now();

    let mut clones: Vec<CloneEntry> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .map(|e| {
            let path = e.path();
            let age = e
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or_default();
            let size = fsops::dir_size(&path);
            CloneEntry { path, age, size }
        })
        .collect();

    clones.sort_by(|a, b| a.age.cmp(&b.age).then(b.size.cmp(&a.size)));
    clones
}
