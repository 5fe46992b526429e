//! Profile metadata and fingerprint persistence.
//!
//! Both files live inside `master/` and are only ever written through the
//! atomic-replace ladder, so a concurrent reader sees fully-old or fully-new
//! content. Metadata updates are read-modify-write: a partial update merges
//! into the record on disk and never replaces it wholesale, and unknown keys
//! written by other versions of this crate survive the cycle.
//!
//! Corruption is recovered in place: an unparseable metadata file is deleted
//! and recreated rather than surfaced, and only a failing recovery write
//! escalates to the caller.

use std::fs;
use std::io;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::errors::ProfileError;
use crate::profile::capabilities::Capabilities;
use crate::profile::fsops;
use crate::profile::layout::PathLayout;

const METADATA_SCHEMA_VERSION: u32 = 1;
const READ_ATTEMPTS: u32 = 3;
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Synthetic browser/device identity. Produced by the injected provider when
/// one is available, otherwise a fixed fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: Dimensions,
    pub screen: Dimensions,
    /// `"provider"` or `"fallback"`.
    #[serde(default)]
    pub source: String,
}

impl Fingerprint {
    pub fn fallback() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
                .to_string(),
            viewport: Dimensions { width: 1920, height: 1080 },
            screen: Dimensions { width: 1920, height: 1080 },
            source: "fallback".to_string(),
        }
    }
}

/// Aggregate of the most recent housekeeping pass, embedded in metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupStats {
    pub removed: usize,
    pub bytes_freed: u64,
    pub remaining: usize,
    pub at: String,
}

fn default_schema_version() -> u32 {
    METADATA_SCHEMA_VERSION
}

/// Flat bookkeeping record for the master profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub profile_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_generated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_provider_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cookie_import_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cookie_import_ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cookie_import_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cleanup: Option<CleanupStats>,
    /// Keys written by other versions pass through read-modify-write intact.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub struct ProfileMetadataStore {
    layout: PathLayout,
    capabilities: Capabilities,
    profile_type: String,
}

impl ProfileMetadataStore {
    pub fn new(layout: PathLayout, capabilities: Capabilities, profile_type: String) -> Self {
        Self { layout, capabilities, profile_type }
    }

    fn initial_metadata(&self) -> ProfileMetadata {
        let now = now_rfc3339();
        ProfileMetadata {
            schema_version: METADATA_SCHEMA_VERSION,
            profile_type: self.profile_type.clone(),
            created_at: Some(now.clone()),
            updated_at: Some(now),
            fingerprint_provider_version: self
                .capabilities
                .fingerprint_provider
                .as_ref()
                .and_then(|p| p.version()),
            ..ProfileMetadata::default()
        }
    }

    /// Creates the metadata record and fingerprint on first use. When only the
    /// fingerprint file is missing, just that is regenerated.
    pub fn ensure_metadata(&self) -> Result<ProfileMetadata, ProfileError> {
        if !self.layout.metadata_file().exists() {
            self.persist(&self.initial_metadata())?;
            self.generate_fingerprint()?;
            return self.read_metadata();
        }
        if !self.layout.fingerprint_file().exists() {
            self.generate_fingerprint()?;
            return self.read_metadata();
        }
        self.read_metadata()
    }

    /// Tolerant read: transient I/O failures are retried a few times, and a
    /// parse failure deletes and recreates the file instead of propagating.
    pub fn read_metadata(&self) -> Result<ProfileMetadata, ProfileError> {
        let path = self.layout.metadata_file();
        let mut recreated = false;
        let mut last_io: Option<io::Error> = None;

        for attempt in 1..=READ_ATTEMPTS {
            match fs::read_to_string(&path) {
                Ok(text) => match serde_json::from_str::<ProfileMetadata>(&text) {
                    Ok(meta) => return Ok(meta),
                    Err(e) if !recreated => {
                        log::warn!(
                            "metadata at {} is corrupt ({e}); recreating",
                            path.display()
                        );
                        let _ = fs::remove_file(&path);
                        self.persist(&self.initial_metadata())?;
                        recreated = true;
                    }
                    Err(e) => {
                        return Err(ProfileError::Corrupted(format!(
                            "metadata at {} unreadable after recreate: {e}",
                            path.display()
                        )));
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    let meta = self.initial_metadata();
                    self.persist(&meta)?;
                    return Ok(meta);
                }
                Err(e) => {
                    last_io = Some(e);
                    if attempt < READ_ATTEMPTS {
                        thread::sleep(READ_RETRY_DELAY);
                    }
                }
            }
        }

        Err(last_io
            .map(ProfileError::Io)
            .unwrap_or_else(|| ProfileError::Corrupted("metadata read exhausted".into())))
    }

    /// Read-modify-write. Always refreshes `updated_at`.
    pub fn update_metadata<F>(&self, patch: F) -> Result<ProfileMetadata, ProfileError>
    where
        F: FnOnce(&mut ProfileMetadata),
    {
        let mut meta = self.read_metadata()?;
        patch(&mut meta);
        meta.updated_at = Some(now_rfc3339());
        self.persist(&meta)?;
        Ok(meta)
    }

    /// Produces and persists the fingerprint, then records the outcome and its
    /// origin in metadata. Provider absence or failure is not an error; the
    /// fixed fallback is used instead.
    pub fn generate_fingerprint(&self) -> Result<Fingerprint, ProfileError> {
        let mut fingerprint = match self.capabilities.fingerprint_provider.as_ref() {
            Some(provider) => match provider.generate() {
                Ok(fp) => {
                    let mut fp = fp;
                    fp.source = "provider".to_string();
                    fp
                }
                Err(e) => {
                    log::warn!("fingerprint provider failed ({e}); using fallback");
                    Fingerprint::fallback()
                }
            },
            None => Fingerprint::fallback(),
        };
        if fingerprint.source.is_empty() {
            fingerprint.source = "fallback".to_string();
        }

        let bytes = serde_json::to_vec_pretty(&fingerprint)
            .map_err(|e| ProfileError::Corrupted(format!("fingerprint serialization: {e}")))?;
        match fsops::atomic_write(&self.layout.fingerprint_file(), &bytes) {
            Ok(()) => {
                let source = fingerprint.source.clone();
                self.update_metadata(|m| {
                    m.fingerprint_generated = Some(true);
                    m.fingerprint_source = Some(source);
                })?;
                Ok(fingerprint)
            }
            Err(e) => {
                // Record the failure, but surface the original error.
                if let Err(meta_err) = self.update_metadata(|m| {
                    m.fingerprint_generated = Some(false);
                }) {
                    log::warn!("could not record fingerprint failure: {meta_err}");
                }
                Err(e)
            }
        }
    }

    /// Reads the persisted fingerprint, if present and parseable.
    pub fn read_fingerprint(&self) -> Option<Fingerprint> {
        let text = fs::read_to_string(self.layout.fingerprint_file()).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn persist(&self, meta: &ProfileMetadata) -> Result<(), ProfileError> {
        let bytes = serde_json::to_vec_pretty(meta)
            .map_err(|e| ProfileError::Corrupted(format!("metadata serialization: {e}")))?;
        fsops::atomic_write(&self.layout.metadata_file(), &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    use crate::profile::capabilities::FingerprintProvider;

    fn store_at(root: &std::path::Path) -> ProfileMetadataStore {
        let layout = PathLayout::new(root.join("store"));
        layout.ensure_directories().unwrap();
        ProfileMetadataStore::new(layout, Capabilities::none(), "chromium".to_string())
    }

    #[test]
    fn ensure_creates_metadata_and_fingerprint() {
        let tmp = TempDir::new().unwrap();
        let store = store_at(tmp.path());

        let meta = store.ensure_metadata().unwrap();
        assert_eq!(meta.profile_type, "chromium");
        assert_eq!(meta.schema_version, METADATA_SCHEMA_VERSION);
        assert!(meta.created_at.is_some());
        assert_eq!(meta.fingerprint_generated, Some(true));
        assert_eq!(meta.fingerprint_source.as_deref(), Some("fallback"));

        let fp = store.read_fingerprint().unwrap();
        assert_eq!(fp, Fingerprint::fallback());
    }

    #[test]
    fn ensure_regenerates_missing_fingerprint_only() {
        let tmp = TempDir::new().unwrap();
        let store = store_at(tmp.path());

        let first = store.ensure_metadata().unwrap();
        fs::remove_file(store.layout.fingerprint_file()).unwrap();

        let second = store.ensure_metadata().unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert!(store.layout.fingerprint_file().exists());
    }

    #[test]
    fn corrupt_metadata_recovers_silently() {
        let tmp = TempDir::new().unwrap();
        let store = store_at(tmp.path());

        store.ensure_metadata().unwrap();
        fs::write(store.layout.metadata_file(), b"{not json").unwrap();

        let meta = store.read_metadata().unwrap();
        assert_eq!(meta.profile_type, "chromium");
    }

    #[test]
    fn update_preserves_unknown_keys() {
        let tmp = TempDir::new().unwrap();
        let store = store_at(tmp.path());
        store.ensure_metadata().unwrap();

        // Simulate a newer version having written an extra key.
        let mut raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.layout.metadata_file()).unwrap())
                .unwrap();
        raw["future_field"] = serde_json::json!({"nested": 7});
        fs::write(store.layout.metadata_file(), raw.to_string()).unwrap();

        store
            .update_metadata(|m| m.last_cookie_import_count = Some(3))
            .unwrap();

        let meta = store.read_metadata().unwrap();
        assert_eq!(meta.last_cookie_import_count, Some(3));
        assert_eq!(meta.extra["future_field"]["nested"], 7);
    }

    #[test]
    fn update_refreshes_timestamp() {
        let tmp = TempDir::new().unwrap();
        let store = store_at(tmp.path());
        store.ensure_metadata().unwrap();

        let updated = store.update_metadata(|m| m.last_cookie_import_ok = Some(true)).unwrap();
        assert!(updated.updated_at.is_some());
        assert_eq!(updated.last_cookie_import_ok, Some(true));
    }

    struct FailingProvider;

    impl FingerprintProvider for FailingProvider {
        fn generate(&self) -> anyhow::Result<Fingerprint> {
            anyhow::bail!("generator unavailable")
        }
    }

    #[test]
    fn provider_failure_falls_back() {
        let tmp = TempDir::new().unwrap();
        let layout = PathLayout::new(tmp.path().join("store"));
        layout.ensure_directories().unwrap();
        let caps = Capabilities::none().with_provider(Arc::new(FailingProvider));
        let store = ProfileMetadataStore::new(layout, caps, "chromium".to_string());

        let fp = store.generate_fingerprint().unwrap();
        assert_eq!(fp.source, "fallback");

        let meta = store.read_metadata().unwrap();
        assert_eq!(meta.fingerprint_source.as_deref(), Some("fallback"));
    }
}
