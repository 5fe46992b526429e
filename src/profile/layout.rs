//! Directory naming convention for a profile root.
//!
//! Layout (root-relative):
//! ```text
//! master/                    authoritative profile
//! master/metadata.json
//! master/fingerprint.json
//! master/Default/Cookies     SQLite cookie database, browser-engine schema
//! clones/<uuid>/             one ephemeral copy per read checkout
//! profile.lock               write-exclusion evidence
//! ```
//!
//! `PathLayout` is pure path computation; the only I/O it performs is
//! [`PathLayout::ensure_directories`]. It never fabricates paths outside the
//! root it was constructed with.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

const MASTER_DIR: &str = "master";
const CLONES_DIR: &str = "clones";
const LOCK_FILE: &str = "profile.lock";
const METADATA_FILE: &str = "metadata.json";
const FINGERPRINT_FILE: &str = "fingerprint.json";

#[derive(Debug, Clone)]
pub struct PathLayout {
    root: PathBuf,
}

impl PathLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn master_dir(&self) -> PathBuf {
        self.root.join(MASTER_DIR)
    }

    pub fn clones_dir(&self) -> PathBuf {
        self.root.join(CLONES_DIR)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.master_dir().join(METADATA_FILE)
    }

    pub fn fingerprint_file(&self) -> PathBuf {
        self.master_dir().join(FINGERPRINT_FILE)
    }

    /// Path of the cookie database inside the master profile. Real browser
    /// engines expect `Default/Cookies` and open it directly.
    pub fn cookies_db_path(&self) -> PathBuf {
        self.master_dir().join("Default").join("Cookies")
    }

    /// Allocates a fresh, unique clone directory path. The directory itself is
    /// not created here; the read checkout owns that.
    pub fn generate_clone_path(&self) -> PathBuf {
        self.clones_dir().join(Uuid::new_v4().to_string())
    }

    /// Creates root, master, clones and the cookie database parent directory.
    /// Idempotent.
    pub fn ensure_directories(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.master_dir())?;
        fs::create_dir_all(self.clones_dir())?;
        fs::create_dir_all(self.master_dir().join("Default"))?;
        Ok(())
    }
}
