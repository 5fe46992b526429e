//! Profile store configuration.
//!
//! `ProfileConfig` controls where the master profile lives and how checkouts
//! behave: the write-lock budget, the clone retention policy, and the profile
//! type tag recorded in metadata.
//!
//! A `None` root puts the whole subsystem into *disabled* mode: checkouts
//! degrade to a private self-cleaning temporary directory and the cookie
//! export/import and housekeeping operations become no-ops.
//!
//! `ProfileConfig` provides sensible defaults via [`Default`] and a fluent
//! [`ProfileConfig::builder()`] for customization with validation.
//!
//! # Examples
//!
//! ## Use defaults (disabled mode)
//! ```rust
//! use profile_cache::config::ProfileConfig;
//! let cfg = ProfileConfig::default();
//! assert!(cfg.root.is_none());
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use profile_cache::config::ProfileConfig;
//! use std::time::Duration;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = ProfileConfig::builder()
//!     .root("/var/lib/app/profile")
//!     .lock_timeout(Duration::from_secs(10))
//!     .clone_max_age(Duration::from_secs(6 * 3600))
//!     .clone_max_count(8)
//!     .build()?; // returns Result<ProfileConfig, ProfileConfigError>
//! # Ok(()) }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Root directory of the profile store. `None` disables persistence.
    pub root: Option<PathBuf>,
    /// Tag recorded in profile metadata (e.g. "chromium").
    pub profile_type: String,
    /// How long a write checkout waits for the exclusive lock.
    pub lock_timeout: Duration,
    /// Clones older than this are evicted by housekeeping.
    pub clone_max_age: Duration,
    /// Housekeeping keeps at most this many clones, youngest first.
    pub clone_max_count: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            root: None,
            profile_type: "chromium".to_string(),
            lock_timeout: Duration::from_secs(30),
            clone_max_age: Duration::from_secs(24 * 3600),
            clone_max_count: 16,
        }
    }
}

impl ProfileConfig {
    pub fn builder() -> ProfileConfigBuilder {
        ProfileConfigBuilder::default()
    }
}

/// Builder for [`ProfileConfig`].
#[derive(Debug, Clone)]
pub struct ProfileConfigBuilder {
    inner: ProfileConfig,
}

impl Default for ProfileConfigBuilder {
    fn default() -> Self {
        Self { inner: ProfileConfig::default() }
    }
}

impl ProfileConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut ProfileConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn root<P: Into<PathBuf>>(self, root: P) -> Self { self.map(|c| c.root = Some(root.into())) }
    pub fn profile_type<S: Into<String>>(self, t: S) -> Self { self.map(|c| c.profile_type = t.into()) }
    pub fn lock_timeout(self, d: Duration) -> Self { self.map(|c| c.lock_timeout = d) }
    pub fn clone_max_age(self, d: Duration) -> Self { self.map(|c| c.clone_max_age = d) }
    pub fn clone_max_count(self, n: usize) -> Self { self.map(|c| c.clone_max_count = n) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut ProfileConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<ProfileConfig, ProfileConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone)]
pub enum ProfileConfigError {
    ZeroLockTimeout,
    ZeroCloneCount,
    EmptyProfileType,
}

impl fmt::Display for ProfileConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileConfigError::ZeroLockTimeout =>
                write!(f, "lock_timeout must be non-zero"),
            ProfileConfigError::ZeroCloneCount =>
                write!(f, "clone_max_count must be at least 1"),
            ProfileConfigError::EmptyProfileType =>
                write!(f, "profile_type must not be empty"),
        }
    }
}
impl std::error::Error for ProfileConfigError {}

fn validate(c: &ProfileConfig) -> Result<(), ProfileConfigError> {
    if c.lock_timeout.is_zero() {
        return Err(ProfileConfigError::ZeroLockTimeout);
    }
    if c.clone_max_count == 0 {
        return Err(ProfileConfigError::ZeroCloneCount);
    }
    if c.profile_type.is_empty() {
        return Err(ProfileConfigError::EmptyProfileType);
    }
    Ok(())
}
