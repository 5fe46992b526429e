//! Filesystem primitives shared by the metadata store, cookie store and
//! checkout cleanup: atomic replace with a fallback ladder, recursive tree
//! copy/removal, and size accounting.
//!
//! The replace ladder exists because the destination may be held open by a
//! concurrent reader or an external browser process. The sequence is:
//! rename → loosen destination permissions + rename → remove-then-rename →
//! plain copy. Only exhaustion of the whole ladder, retried with backoff,
//! surfaces to the caller.

use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::errors::ProfileError;

const REPLACE_ATTEMPTS: u32 = 3;
const REPLACE_BACKOFF: Duration = Duration::from_millis(50);
const REMOVE_BACKOFF: Duration = Duration::from_millis(100);

/// Writes `bytes` to `dest` atomically: staged in a temp file in the same
/// directory, flushed and best-effort synced, then swapped in via
/// [`replace_file`]. A concurrent reader observes either the old content or
/// the new content, never a truncated file.
pub(crate) fn atomic_write(dest: &Path, bytes: &[u8]) -> Result<(), ProfileError> {
    let parent = dest.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent directory")
    })?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    // Durability is best-effort; the rename is the atomicity boundary.
    let _ = tmp.as_file().sync_all();

    let staged = tmp.into_temp_path();
    replace_file(&staged, dest)
}

/// Swaps `staged` in for `dest`, retrying the fallback ladder with backoff.
/// On failure `dest` is left exactly as it was.
pub(crate) fn replace_file(staged: &Path, dest: &Path) -> Result<(), ProfileError> {
    let mut delay = REPLACE_BACKOFF;
    let mut last_err: Option<io::Error> = None;

    for attempt in 1..=REPLACE_ATTEMPTS {
        match try_replace(staged, dest) {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::debug!(
                    "replace of {} failed on attempt {attempt}: {e}",
                    dest.display()
                );
                last_err = Some(e);
                if attempt < REPLACE_ATTEMPTS {
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }

    Err(ProfileError::Exhausted(format!(
        "could not replace {}: {}",
        dest.display(),
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn try_replace(staged: &Path, dest: &Path) -> io::Result<()> {
    if fs::rename(staged, dest).is_ok() {
        return Ok(());
    }

    // The destination may be read-only or held by another process.
    if let Ok(meta) = fs::metadata(dest) {
        let mut perms = meta.permissions();
        if perms.readonly() {
            perms.set_readonly(false);
            let _ = fs::set_permissions(dest, perms);
        }
    }
    if fs::rename(staged, dest).is_ok() {
        return Ok(());
    }

    let _ = fs::remove_file(dest);
    if fs::rename(staged, dest).is_ok() {
        return Ok(());
    }

    // Last resort: a plain move. Not atomic, but only reached when every
    // rename variant has failed.
    fs::copy(staged, dest)?;
    let _ = fs::remove_file(staged);
    Ok(())
}

/// Copies a file with bounded retries, for sources an external writer may be
/// holding locked.
pub(crate) fn copy_file_with_retry(src: &Path, dest: &Path, attempts: u32) -> io::Result<u64> {
    let mut delay = REPLACE_BACKOFF;
    let mut last_err = io::Error::new(io::ErrorKind::Other, "no attempts made");

    for attempt in 1..=attempts {
        match fs::copy(src, dest) {
            Ok(n) => return Ok(n),
            Err(e) => {
                last_err = e;
                if attempt < attempts {
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }
    Err(last_err)
}

/// Recursively copies `src` into `dest`. Symlinks are skipped; the profile
/// directories written by browser engines are plain files and directories.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => continue,
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Clears read-only bits below `root` so a subsequent removal can succeed.
/// Best-effort; errors are ignored.
pub(crate) fn loosen_permissions(root: &Path) {
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if let Ok(meta) = entry.metadata() {
            let mut perms = meta.permissions();
            if perms.readonly() {
                perms.set_readonly(false);
                let _ = fs::set_permissions(entry.path(), perms);
            }
        }
    }
}

/// Removes a directory tree with bounded retry/backoff, loosening permissions
/// before each attempt. Returns `true` once the tree is gone.
pub(crate) fn remove_tree_with_retry(root: &Path, attempts: u32) -> bool {
    let mut delay = REMOVE_BACKOFF;
    for attempt in 1..=attempts {
        if !root.exists() {
            return true;
        }
        loosen_permissions(root);
        match fs::remove_dir_all(root) {
            Ok(()) => return true,
            Err(e) => {
                log::debug!(
                    "removal of {} failed on attempt {attempt}: {e}",
                    root.display()
                );
                if attempt < attempts {
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }
    !root.exists()
}

/// Sums file sizes under `root`. An absent directory counts as zero.
pub(crate) fn dir_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_replaces_existing_content() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("meta.json");

        atomic_write(&dest, b"{\"v\":1}").unwrap();
        atomic_write(&dest, b"{\"v\":2}").unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "{\"v\":2}");
        // No stray staging files left behind.
        let leftovers = fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn replace_survives_read_only_destination() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("target");
        fs::write(&dest, b"old").unwrap();
        let mut perms = fs::metadata(&dest).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&dest, perms).unwrap();

        atomic_write(&dest, b"new").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn copy_tree_copies_nested_files() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("Default")).unwrap();
        fs::write(src.join("top.txt"), b"top").unwrap();
        fs::write(src.join("Default").join("Cookies"), b"db").unwrap();

        let dest = tmp.path().join("dest");
        copy_tree(&src, &dest).unwrap();

        assert_eq!(fs::read(dest.join("top.txt")).unwrap(), b"top");
        assert_eq!(fs::read(dest.join("Default").join("Cookies")).unwrap(), b"db");
    }

    #[test]
    fn remove_tree_clears_read_only_entries() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("clone");
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("locked");
        fs::write(&file, b"x").unwrap();
        let mut perms = fs::metadata(&file).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&file, perms).unwrap();

        assert!(remove_tree_with_retry(&dir, 3));
        assert!(!dir.exists());
    }

    #[test]
    fn dir_size_tolerates_missing_dir() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(dir_size(&tmp.path().join("nope")), 0);

        fs::write(tmp.path().join("a"), vec![0u8; 10]).unwrap();
        fs::write(tmp.path().join("b"), vec![0u8; 5]).unwrap();
        assert_eq!(dir_size(tmp.path()), 15);
    }
}
