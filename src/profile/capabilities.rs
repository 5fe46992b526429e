//! Process-wide capability resolution.
//!
//! Platform and environment availability (advisory file locks, an external
//! fingerprint generator) is probed once at startup into a [`Capabilities`]
//! value and passed to collaborators, instead of being re-checked ad hoc at
//! every call site.

use std::sync::Arc;

use fs2::FileExt;

use crate::profile::metadata::Fingerprint;

/// External fingerprint generator. The real implementation lives outside this
/// crate; when it is absent or fails, the metadata store substitutes a fixed
/// synthetic fingerprint.
pub trait FingerprintProvider: Send + Sync {
    fn generate(&self) -> anyhow::Result<Fingerprint>;

    /// Provider version recorded in profile metadata, if known.
    fn version(&self) -> Option<String> {
        None
    }
}

#[derive(Clone)]
pub struct Capabilities {
    /// Whether `flock`-style advisory locks work here. When `false`, write
    /// exclusion falls back to create-exclusive lock files.
    pub advisory_locks: bool,
    pub fingerprint_provider: Option<Arc<dyn FingerprintProvider>>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("advisory_locks", &self.advisory_locks)
            .field("fingerprint_provider", &self.fingerprint_provider.is_some())
            .finish()
    }
}

impl Capabilities {
    /// Probes the environment once. The advisory-lock probe locks and unlocks
    /// a scratch temp file; anything short of full success selects the
    /// create-exclusive fallback strategy.
    pub fn detect() -> Self {
        Self {
            advisory_locks: probe_advisory_locks(),
            fingerprint_provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn FingerprintProvider>) -> Self {
        self.fingerprint_provider = Some(provider);
        self
    }

    /// All capabilities off; useful for tests and constrained environments.
    pub fn none() -> Self {
        Self { advisory_locks: false, fingerprint_provider: None }
    }
}

fn probe_advisory_locks() -> bool {
    let Ok(file) = tempfile::tempfile() else {
        return false;
    };
    if file.try_lock_exclusive().is_err() {
        return false;
    }
    file.unlock().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_probes_without_panicking() {
        let caps = Capabilities::detect();
        // Result is platform-dependent; the probe itself must not fail.
        let _ = caps.advisory_locks;
        assert!(caps.fingerprint_provider.is_none());
    }

    struct FixedProvider;

    impl FingerprintProvider for FixedProvider {
        fn generate(&self) -> anyhow::Result<Fingerprint> {
            Ok(Fingerprint::fallback())
        }

        fn version(&self) -> Option<String> {
            Some("test-1".to_string())
        }
    }

    #[test]
    fn provider_can_be_attached() {
        let caps = Capabilities::none().with_provider(Arc::new(FixedProvider));
        let provider = caps.fingerprint_provider.as_ref().unwrap();
        assert_eq!(provider.version().as_deref(), Some("test-1"));
    }
}
