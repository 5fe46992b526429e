//! Profile checkout orchestration: [`ProfileContextManager`] and the
//! [`ProfileCheckout`] guard.
//!
//! A checkout is either `write` (exclusive, the master directory itself,
//! guarded by the cross-process lock) or `read` (an isolated disposable clone
//! of the master). With no root configured the manager is *disabled* and a
//! checkout degrades to a private self-cleaning temporary directory with no
//! locking at all.
//!
//! Release is a scoped-resource guarantee: it runs on every exit path via
//! `Drop`, is safe to call twice, and never panics or escalates — cleanup
//! failures are logged and swallowed so they cannot mask the checkout's
//! primary outcome.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tempfile::TempDir;

use crate::config::ProfileConfig;
use crate::errors::ProfileError;
use crate::profile::capabilities::Capabilities;
use crate::profile::fsops;
use crate::profile::layout::PathLayout;
use crate::profile::lock::{self, ProfileLock};
use crate::profile::metadata::ProfileMetadataStore;

const CLONE_REMOVE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    Write,
    Read,
}

impl FromStr for CheckoutMode {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write" => Ok(CheckoutMode::Write),
            "read" => Ok(CheckoutMode::Read),
            other => Err(ProfileError::InvalidMode(other.to_string())),
        }
    }
}

pub struct ProfileContextManager {
    config: ProfileConfig,
    capabilities: Capabilities,
    layout: Option<PathLayout>,
    metadata: Option<ProfileMetadataStore>,
}

impl ProfileContextManager {
    pub fn new(config: ProfileConfig, capabilities: Capabilities) -> Self {
        let layout = config.root.as_ref().map(PathLayout::new);
        let metadata = layout.as_ref().map(|l| {
            ProfileMetadataStore::new(
                l.clone(),
                capabilities.clone(),
                config.profile_type.clone(),
            )
        });
        Self { config, capabilities, layout, metadata }
    }

    /// Manager with detected capabilities.
    pub fn with_config(config: ProfileConfig) -> Self {
        Self::new(config, Capabilities::detect())
    }

    pub fn disabled(&self) -> bool {
        self.layout.is_none()
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    pub fn layout(&self) -> Option<&PathLayout> {
        self.layout.as_ref()
    }

    pub fn metadata_store(&self) -> Option<&ProfileMetadataStore> {
        self.metadata.as_ref()
    }

    /// String-mode checkout for callers that pass modes through from an
    /// outer surface. Unknown modes are rejected synchronously.
    pub fn checkout(&self, mode: &str) -> Result<ProfileCheckout, ProfileError> {
        match mode.parse::<CheckoutMode>()? {
            CheckoutMode::Write => self.checkout_write(),
            CheckoutMode::Read => self.checkout_read(),
        }
    }

    /// Exclusive access to the master profile. Fails closed with
    /// [`ProfileError::LockTimeout`] when another process holds the write
    /// checkout past the configured budget; retrying is the caller's call.
    pub fn checkout_write(&self) -> Result<ProfileCheckout, ProfileError> {
        let Some(layout) = &self.layout else {
            return self.checkout_disabled(CheckoutMode::Write);
        };
        layout.ensure_directories()?;

        let mut lock = lock::strategy_for(&self.capabilities, layout.lock_file());
        if !lock.acquire(self.config.lock_timeout)? {
            return Err(ProfileError::LockTimeout { waited: self.config.lock_timeout });
        }

        if let Some(store) = &self.metadata {
            if let Err(e) = store.ensure_metadata() {
                lock.release();
                return Err(e);
            }
        }

        Ok(ProfileCheckout {
            path: layout.master_dir(),
            mode: CheckoutMode::Write,
            state: Some(CheckoutState::Write { lock }),
        })
    }

    /// Point-in-time copy of the master, isolated from every other checkout.
    /// The copy does not coordinate with an in-flight writer; callers that
    /// need a consistent snapshot take the write checkout instead.
    pub fn checkout_read(&self) -> Result<ProfileCheckout, ProfileError> {
        let Some(layout) = &self.layout else {
            return self.checkout_disabled(CheckoutMode::Read);
        };
        layout.ensure_directories()?;

        let clone_dir = layout.generate_clone_path();
        let master = layout.master_dir();
        let result = if master.exists() {
            fsops::copy_tree(&master, &clone_dir)
        } else {
            fs::create_dir_all(&clone_dir)
        };
        if let Err(e) = result {
            // Fail closed: no half-copied clone left behind.
            fsops::remove_tree_with_retry(&clone_dir, CLONE_REMOVE_ATTEMPTS);
            return Err(e.into());
        }

        Ok(ProfileCheckout {
            path: clone_dir.clone(),
            mode: CheckoutMode::Read,
            state: Some(CheckoutState::Read { clone_dir }),
        })
    }

    fn checkout_disabled(&self, mode: CheckoutMode) -> Result<ProfileCheckout, ProfileError> {
        let tmp = tempfile::Builder::new().prefix("profile-").tempdir()?;
        Ok(ProfileCheckout {
            path: tmp.path().to_path_buf(),
            mode,
            state: Some(CheckoutState::Disabled { _tmp: tmp }),
        })
    }
}

enum CheckoutState {
    Write { lock: Box<dyn ProfileLock + Send> },
    Read { clone_dir: PathBuf },
    Disabled { _tmp: TempDir },
}

/// A live checkout. Dropping it (or calling [`ProfileCheckout::release`])
/// gives the profile back: the write lock is dropped, or the clone tree is
/// removed with bounded retries.
pub struct ProfileCheckout {
    path: PathBuf,
    mode: CheckoutMode,
    state: Option<CheckoutState>,
}

impl std::fmt::Debug for ProfileCheckout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileCheckout")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish()
    }
}

impl ProfileCheckout {
    /// Directory this checkout may use for its lifetime.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> CheckoutMode {
        self.mode
    }

    /// Idempotent. Never panics; cleanup failures are logged only.
    pub fn release(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        match state {
            CheckoutState::Write { mut lock } => lock.release(),
            CheckoutState::Read { clone_dir } => {
                if !fsops::remove_tree_with_retry(&clone_dir, CLONE_REMOVE_ATTEMPTS) {
                    log::warn!(
                        "clone at {} could not be removed; housekeeping will retry",
                        clone_dir.display()
                    );
                }
            }
            CheckoutState::Disabled { _tmp } => {
                // TempDir cleans itself up on drop.
            }
        }
    }
}

impl Drop for ProfileCheckout {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manager_at(root: &Path) -> ProfileContextManager {
        let config = ProfileConfig::builder()
            .root(root)
            .lock_timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        ProfileContextManager::new(config, Capabilities::detect())
    }

    #[test]
    fn invalid_mode_is_rejected_synchronously() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_at(&tmp.path().join("store"));
        let err = manager.checkout("rw").unwrap_err();
        assert!(matches!(err, ProfileError::InvalidMode(m) if m == "rw"));
    }

    #[test]
    fn write_checkout_initializes_fresh_root() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_at(&tmp.path().join("store"));

        let checkout = manager.checkout("write").unwrap();
        let layout = manager.layout().unwrap();
        assert_eq!(checkout.path(), layout.master_dir());
        assert!(layout.metadata_file().exists());
        assert!(layout.fingerprint_file().exists());

        let meta = manager.metadata_store().unwrap().read_metadata().unwrap();
        assert_eq!(meta.profile_type, "chromium");
        assert!(meta.created_at.is_some());
    }

    #[test]
    fn second_write_checkout_times_out_while_first_is_held() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_at(&tmp.path().join("store"));

        let mut first = manager.checkout_write().unwrap();
        let err = manager.checkout_write().unwrap_err();
        assert!(matches!(err, ProfileError::LockTimeout { .. }));

        first.release();
        let second = manager.checkout_write().unwrap();
        drop(second);
    }

    #[test]
    fn read_checkout_is_isolated_from_master_and_siblings() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_at(&tmp.path().join("store"));

        {
            let write = manager.checkout_write().unwrap();
            fs::write(write.path().join("seed.txt"), b"seed").unwrap();
        }

        let a = manager.checkout_read().unwrap();
        let b = manager.checkout_read().unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(fs::read(a.path().join("seed.txt")).unwrap(), b"seed");

        fs::write(a.path().join("seed.txt"), b"mutated").unwrap();
        fs::write(a.path().join("scratch.bin"), b"x").unwrap();

        let master = manager.layout().unwrap().master_dir();
        assert_eq!(fs::read(master.join("seed.txt")).unwrap(), b"seed");
        assert_eq!(fs::read(b.path().join("seed.txt")).unwrap(), b"seed");
        assert!(!b.path().join("scratch.bin").exists());
    }

    #[test]
    fn release_removes_clone_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_at(&tmp.path().join("store"));

        let mut checkout = manager.checkout_read().unwrap();
        let clone_dir = checkout.path().to_path_buf();
        assert!(clone_dir.is_dir());

        checkout.release();
        assert!(!clone_dir.exists());
        checkout.release(); // no-op
    }

    #[test]
    fn read_checkout_without_master_yields_empty_usable_clone() {
        let tmp = TempDir::new().unwrap();
        // Build the manager but never take a write checkout.
        let manager = manager_at(&tmp.path().join("fresh"));

        let checkout = manager.checkout_read().unwrap();
        assert!(checkout.path().is_dir());
        fs::write(checkout.path().join("works.txt"), b"ok").unwrap();
    }

    #[test]
    fn disabled_manager_yields_self_cleaning_temp_dir() {
        let manager =
            ProfileContextManager::new(ProfileConfig::default(), Capabilities::none());
        assert!(manager.disabled());

        let path = {
            let checkout = manager.checkout("write").unwrap();
            assert!(checkout.path().is_dir());
            fs::write(checkout.path().join("scratch"), b"x").unwrap();
            checkout.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn checkout_releases_on_drop_allowing_next_writer() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_at(&tmp.path().join("store"));

        drop(manager.checkout_write().unwrap());
        // The lock file from a clean release is gone.
        assert!(!manager.layout().unwrap().lock_file().exists());
        drop(manager.checkout_write().unwrap());
    }

    #[test]
    fn concurrent_writers_serialize_across_threads() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("store");
        let active = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let root = root.clone();
                let active = Arc::clone(&active);
                std::thread::spawn(move || {
                    let config = ProfileConfig::builder()
                        .root(&root)
                        .lock_timeout(Duration::from_secs(10))
                        .build()
                        .unwrap();
                    let manager = ProfileContextManager::new(config, Capabilities::detect());
                    let checkout = manager.checkout_write().unwrap();

                    let now = active.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(now, 0, "two write checkouts active at once");
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);

                    drop(checkout);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
