//! SQLite-backed cookie store.
//!
//! The database file is the browser engine's own `Cookies` database: the
//! column set, types and uniqueness constraint match what the engine writes,
//! so a real browser process can open the file directly.
//!
//! ## I/O characteristics
//! - Reads never touch the live file: the database is copied to a private
//!   temp file first (an external browser may be holding write locks), the
//!   copy is queried, and the copy is deleted regardless of outcome.
//! - Writes are staged in a working copy and atomically swapped in, so a
//!   partial batch is never visible: either the whole import commits or the
//!   original file is untouched.
//! - A file that fails to open as a database is treated as corrupt and
//!   rebuilt from scratch; `read_all` degrades to an empty set instead of
//!   erroring.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use tempfile::NamedTempFile;

use crate::cookies::record::{CookieRecord, SameSite};
use crate::errors::ProfileError;
use crate::profile::fsops;

const COPY_ATTEMPTS: u32 = 3;
const QUERY_ATTEMPTS: u32 = 3;
const QUERY_RETRY_DELAY: Duration = Duration::from_millis(50);
const BUSY_TIMEOUT: Duration = Duration::from_millis(500);

/// Engine cookie table plus its lookup index. Auxiliary columns the engine
/// expects (`priority`, `encrypted_value`, `source_scheme`) are carried with
/// engine-default values.
const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cookies (
    creation_utc INTEGER NOT NULL,
    host_key TEXT NOT NULL,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    path TEXT NOT NULL,
    expires_utc INTEGER NOT NULL,
    is_secure INTEGER NOT NULL,
    is_httponly INTEGER NOT NULL,
    last_access_utc INTEGER NOT NULL,
    has_expires INTEGER NOT NULL DEFAULT 1,
    is_persistent INTEGER NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 1,
    encrypted_value BLOB DEFAULT '',
    samesite INTEGER NOT NULL DEFAULT -1,
    source_scheme INTEGER NOT NULL DEFAULT 0,
    UNIQUE (creation_utc, host_key, name, path)
);
CREATE INDEX IF NOT EXISTS cookies_host_index ON cookies (host_key);";

const INSERT_SQL: &str = "INSERT OR REPLACE INTO cookies (
    creation_utc, host_key, name, value, path, expires_utc,
    is_secure, is_httponly, last_access_utc, has_expires, is_persistent,
    priority, encrypted_value, samesite, source_scheme
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, X'', ?12, 0)";

const SELECT_SQL: &str = "SELECT creation_utc, host_key, name, value, path, expires_utc,
    is_secure, is_httponly, last_access_utc, is_persistent, samesite
    FROM cookies ORDER BY creation_utc";

pub struct CookieStore {
    db_path: PathBuf,
}

impl CookieStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self { db_path: db_path.into() }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Creates the cookie table and index if the file is absent or lacks
    /// them. A file that is not a database is rebuilt; `Ok(false)` means the
    /// rebuild could not be completed and the original file was left alone.
    pub fn ensure_schema(&self) -> Result<bool, ProfileError> {
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match create_schema(&self.db_path) {
            Ok(()) => Ok(true),
            Err(e) if is_corruption(&e) => {
                log::warn!(
                    "cookie database at {} is corrupt ({e}); reinitializing",
                    self.db_path.display()
                );
                Ok(self.reinitialize())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Builds a fresh empty database in a temp file and atomically replaces
    /// the current one. `false` leaves the original untouched.
    pub fn reinitialize(&self) -> bool {
        let Some(parent) = self.db_path.parent() else {
            return false;
        };
        if fs::create_dir_all(parent).is_err() {
            return false;
        }
        let staged = match staged_db_in(parent) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("could not stage replacement cookie database: {e}");
                return false;
            }
        };
        if let Err(e) = create_schema(&staged) {
            log::warn!("could not build replacement cookie database: {e}");
            return false;
        }
        match fsops::replace_file(&staged, &self.db_path) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("could not swap in replacement cookie database: {e}");
                false
            }
        }
    }

    /// Reads every cookie row. The live file is copied to a private temp file
    /// first; the copy is queried with bounded retries and always deleted.
    /// Unrecoverable failure yields an empty set, never an error.
    pub fn read_all(&self) -> Vec<CookieRecord> {
        if !self.db_path.exists() {
            return Vec::new();
        }

        let snapshot = match self.snapshot_for_read() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!(
                    "could not snapshot cookie database at {}: {e}",
                    self.db_path.display()
                );
                return Vec::new();
            }
        };

        let mut delay = QUERY_RETRY_DELAY;
        for attempt in 1..=QUERY_ATTEMPTS {
            match query_all(snapshot.path()) {
                Ok(rows) => return rows,
                Err(e) if is_transient(&e) && attempt < QUERY_ATTEMPTS => {
                    thread::sleep(delay);
                    delay *= 2;
                }
                Err(e) => {
                    log::warn!("cookie query failed: {e}");
                    return Vec::new();
                }
            }
        }
        Vec::new()
    }

    /// Applies `rows` as insert-or-replace against a working copy, then swaps
    /// the copy in. Re-importing the same rows is idempotent per the
    /// uniqueness key. Empty input is a successful no-op. On any failure the
    /// original file is exactly as it was.
    pub fn write_all(&self, rows: &[CookieRecord]) -> Result<(), ProfileError> {
        if rows.is_empty() {
            return Ok(());
        }
        let parent = self
            .db_path
            .parent()
            .ok_or_else(|| ProfileError::Exhausted("cookie database has no parent".into()))?;
        fs::create_dir_all(parent)?;

        let staged = staged_db_in(parent)?;
        if self.db_path.exists() {
            if let Err(e) = fsops::copy_file_with_retry(&self.db_path, &staged, COPY_ATTEMPTS) {
                log::warn!(
                    "could not copy cookie database for import ({e}); rebuilding from scratch"
                );
                fs::write(&staged, b"")?;
            }
        }

        match populate(&staged, rows) {
            Ok(()) => {}
            Err(e) if is_corruption(&e) => {
                log::warn!("cookie database is corrupt ({e}); rebuilding from import");
                fs::write(&staged, b"")?;
                populate(&staged, rows)?;
            }
            Err(e) => return Err(e.into()),
        }

        fsops::replace_file(&staged, &self.db_path)
    }

    fn snapshot_for_read(&self) -> std::io::Result<NamedTempFile> {
        let snapshot = tempfile::Builder::new()
            .prefix("Cookies.")
            .suffix(".read")
            .tempfile()?;
        fsops::copy_file_with_retry(&self.db_path, snapshot.path(), COPY_ATTEMPTS)?;
        Ok(snapshot)
    }
}

/// Stages an empty file next to the destination so the final rename stays on
/// one filesystem.
fn staged_db_in(parent: &Path) -> std::io::Result<tempfile::TempPath> {
    let staged = tempfile::Builder::new()
        .prefix("Cookies.")
        .suffix(".staged")
        .tempfile_in(parent)?;
    Ok(staged.into_temp_path())
}

fn create_schema(path: &Path) -> rusqlite::Result<()> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(SCHEMA)
}

fn populate(path: &Path, rows: &[CookieRecord]) -> rusqlite::Result<()> {
    let mut conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(SCHEMA)?;

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(INSERT_SQL)?;
        for row in rows {
            stmt.execute(params![
                row.creation_utc,
                row.host_key,
                row.name,
                row.value,
                row.path,
                row.expires_utc,
                row.is_secure as i64,
                row.is_httponly as i64,
                row.last_access_utc,
                (row.expires_utc != 0) as i64,
                row.is_persistent as i64,
                row.same_site.code(),
            ])?;
        }
    }
    tx.commit()
}

fn query_all(path: &Path) -> rusqlite::Result<Vec<CookieRecord>> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    let mut stmt = conn.prepare(SELECT_SQL)?;
    let rows = stmt.query_map([], |row| {
        Ok(CookieRecord {
            creation_utc: row.get(0)?,
            host_key: row.get(1)?,
            name: row.get(2)?,
            value: row.get(3)?,
            path: row.get(4)?,
            expires_utc: row.get(5)?,
            is_secure: row.get::<_, i64>(6)? != 0,
            is_httponly: row.get::<_, i64>(7)? != 0,
            last_access_utc: row.get(8)?,
            is_persistent: row.get::<_, i64>(9)? != 0,
            same_site: SameSite::from_code(row.get(10)?),
        })
    })?;
    rows.collect()
}

fn is_corruption(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::NotADatabase || err.code == ErrorCode::DatabaseCorrupt
    )
}

fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::DatabaseBusy || err.code == ErrorCode::DatabaseLocked
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(tmp: &TempDir) -> CookieStore {
        CookieStore::new(tmp.path().join("Default").join("Cookies"))
    }

    fn sample_rows() -> Vec<CookieRecord> {
        let mut sid = CookieRecord::new("sid", "abc123", ".example.com", "/");
        sid.is_secure = true;
        sid.is_httponly = true;
        sid.same_site = SameSite::Strict;
        sid.expires_utc = sid.creation_utc + 86_400 * 1_000_000;

        let mut theme = CookieRecord::new("theme", "dark", "example.com", "/settings");
        theme.creation_utc += 1;
        theme.last_access_utc += 1;
        vec![sid, theme]
    }

    #[test]
    fn write_then_read_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let rows = sample_rows();

        store.write_all(&rows).unwrap();
        let mut read = store.read_all();
        read.sort_by_key(|c| c.creation_utc);

        assert_eq!(read, rows);
    }

    #[test]
    fn reimport_is_idempotent_per_uniqueness_key() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let rows = sample_rows();

        store.write_all(&rows).unwrap();
        store.write_all(&rows).unwrap();

        assert_eq!(store.read_all().len(), rows.len());
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        store.write_all(&[]).unwrap();
        assert!(!store.db_path().exists());
    }

    #[test]
    fn read_on_missing_database_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(store_in(&tmp).read_all().is_empty());
    }

    #[test]
    fn corrupt_database_reads_empty_then_reinitializes() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::create_dir_all(store.db_path().parent().unwrap()).unwrap();
        fs::write(store.db_path(), b"this is not a sqlite database, not even close").unwrap();

        assert!(store.read_all().is_empty());
        assert!(store.ensure_schema().unwrap());

        // The rebuilt database is a valid empty table.
        assert!(store.read_all().is_empty());
        store.write_all(&sample_rows()).unwrap();
        assert_eq!(store.read_all().len(), 2);
    }

    #[test]
    fn write_over_corrupt_database_replaces_it_whole() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::create_dir_all(store.db_path().parent().unwrap()).unwrap();
        fs::write(store.db_path(), b"garbage").unwrap();

        store.write_all(&sample_rows()).unwrap();
        assert_eq!(store.read_all().len(), 2);
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        assert!(store.ensure_schema().unwrap());
        assert!(store.ensure_schema().unwrap());
        assert!(store.db_path().exists());
    }

    #[test]
    fn database_opens_with_plain_sqlite() {
        // The file must stay readable by an engine opening it directly.
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.write_all(&sample_rows()).unwrap();

        let conn = Connection::open(store.db_path()).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM cookies", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 2);

        // Auxiliary engine columns carry their default values.
        let (priority, scheme): (i64, i64) = conn
            .query_row(
                "SELECT priority, source_scheme FROM cookies LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(priority, 1);
        assert_eq!(scheme, 0);
    }
}
