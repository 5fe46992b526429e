//! Cookie import/export between the engine database and the formats the
//! automation surfaces speak.
//!
//! Two export shapes:
//! - `flat`: the raw rows wrapped with profile metadata, an availability
//!   flag and an export timestamp.
//! - `storage_state`: the browser-automation interchange format (name /
//!   value / domain / path / expires / flags) with an empty origins list.
//!
//! A disabled store or a missing master profile exports nothing — that is an
//! absence, not an error.

use std::str::FromStr;

use serde_json::{json, Value};

use crate::cookies::record::{unix_secs_from_engine_time, CookieRecord};
use crate::cookies::store::CookieStore;
use crate::errors::ProfileError;
use crate::profile::{now_rfc3339, ProfileContextManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Flat,
    StorageState,
}

impl FromStr for ExportFormat {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(ExportFormat::Flat),
            "storage_state" => Ok(ExportFormat::StorageState),
            other => Err(ProfileError::InvalidFormat(other.to_string())),
        }
    }
}

pub struct CookieSync<'a> {
    manager: &'a ProfileContextManager,
}

impl<'a> CookieSync<'a> {
    pub fn new(manager: &'a ProfileContextManager) -> Self {
        Self { manager }
    }

    /// Reads all cookies from the master profile and shapes them for
    /// `format`. `None` when the store is disabled or the master profile has
    /// never been created.
    pub fn export(&self, format: ExportFormat) -> Option<Value> {
        let layout = self.manager.layout()?;
        if !layout.master_dir().exists() {
            return None;
        }
        let cookies = CookieStore::new(layout.cookies_db_path()).read_all();

        let payload = match format {
            ExportFormat::Flat => {
                let metadata = self
                    .manager
                    .metadata_store()
                    .and_then(|s| s.read_metadata().ok());
                json!({
                    "cookies": cookies,
                    "metadata": metadata,
                    "available": true,
                    "exported_at": now_rfc3339(),
                })
            }
            ExportFormat::StorageState => json!({
                "cookies": cookies.iter().map(storage_state_entry).collect::<Vec<_>>(),
                "origins": [],
            }),
        };
        Some(payload)
    }

    /// Writes `rows` into the master cookie database and records the outcome
    /// in metadata. An empty list is a successful no-op that still timestamps
    /// the metadata. `Ok(false)` when the store is disabled.
    pub fn import(&self, rows: &[CookieRecord]) -> Result<bool, ProfileError> {
        let Some(layout) = self.manager.layout() else {
            return Ok(false);
        };
        layout.ensure_directories()?;

        if rows.is_empty() {
            self.record_outcome(true, 0);
            return Ok(true);
        }

        let result = CookieStore::new(layout.cookies_db_path()).write_all(rows);
        self.record_outcome(result.is_ok(), rows.len());
        result.map(|()| true)
    }

    fn record_outcome(&self, ok: bool, count: usize) {
        if let Some(store) = self.manager.metadata_store() {
            if let Err(e) = store.update_metadata(|m| {
                m.last_cookie_import_at = Some(now_rfc3339());
                m.last_cookie_import_ok = Some(ok);
                m.last_cookie_import_count = Some(count);
            }) {
                log::warn!("could not record cookie import outcome: {e}");
            }
        }
    }
}

fn storage_state_entry(cookie: &CookieRecord) -> Value {
    let expires = if cookie.is_session() {
        -1
    } else {
        unix_secs_from_engine_time(cookie.expires_utc)
    };
    json!({
        "name": cookie.name,
        "value": cookie.value,
        "domain": cookie.host_key,
        "path": cookie.path,
        "expires": expires,
        "httpOnly": cookie.is_httponly,
        "secure": cookie.is_secure,
        "sameSite": cookie.same_site.as_str(),
    })
}
