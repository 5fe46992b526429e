//! Cookie row representation matching the browser engine's on-disk table.
//!
//! Timestamps are engine-epoch microseconds (microseconds since 1601-01-01
//! UTC, the Chromium convention). `expires_utc == 0` marks a session cookie.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Seconds between 1601-01-01 and 1970-01-01.
const ENGINE_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// Current time in engine-epoch microseconds.
pub fn engine_time_now() -> i64 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    unix.as_micros() as i64 + ENGINE_EPOCH_OFFSET_SECS * 1_000_000
}

pub fn engine_time_from_unix_secs(secs: i64) -> i64 {
    (secs + ENGINE_EPOCH_OFFSET_SECS) * 1_000_000
}

pub fn unix_secs_from_engine_time(t: i64) -> i64 {
    t / 1_000_000 - ENGINE_EPOCH_OFFSET_SECS
}

/// SameSite policy, stored as the engine's integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    None,
    Lax,
    Strict,
}

impl SameSite {
    pub fn code(self) -> i64 {
        match self {
            SameSite::None => 0,
            SameSite::Lax => 1,
            SameSite::Strict => 2,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            2 => SameSite::Strict,
            1 => SameSite::Lax,
            _ => SameSite::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SameSite::None => "None",
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
        }
    }
}

/// One row of the engine's cookie table.
///
/// Uniqueness follows the table constraint:
/// `(creation_utc, host_key, name, path)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    /// Domain scoping, `.example.com`-style for domain cookies.
    pub host_key: String,
    pub path: String,
    /// Engine-epoch microseconds; `0` for session cookies.
    pub expires_utc: i64,
    pub is_secure: bool,
    pub is_httponly: bool,
    pub same_site: SameSite,
    pub creation_utc: i64,
    pub last_access_utc: i64,
    pub is_persistent: bool,
}

impl CookieRecord {
    /// A persistent cookie stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        host_key: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        let now = engine_time_now();
        Self {
            name: name.into(),
            value: value.into(),
            host_key: host_key.into(),
            path: path.into(),
            expires_utc: 0,
            is_secure: false,
            is_httponly: false,
            same_site: SameSite::Lax,
            creation_utc: now,
            last_access_utc: now,
            is_persistent: true,
        }
    }

    pub fn is_session(&self) -> bool {
        self.expires_utc == 0
    }
}
