//! Atomic file writes: temp file + rename
//!
//! Every file privage creates (encrypted secrets, decrypted copies, identity
//! files, config) appears at its final name only through [`atomic_write`].
//! The temp file sits next to the target (`<path>.tmp`) so the final rename
//! never crosses a filesystem boundary.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{PrivageError, PrivageResult};

/// Permission bits for every secret-bearing file.
pub const SECRET_FILE_MODE: u32 = 0o600;

/// Temp path used while `path` is being written.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Create `path` exclusively (fails if it already exists) with `mode`.
pub fn create_exclusive(path: &Path, mode: u32) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

/// Write `path` atomically.
///
/// `produce` writes the content into a buffered writer over `<path>.tmp`.
/// The writer is flushed and synced, then the temp file is renamed over
/// `path`. On any failure the temp file is removed and every error seen
/// (producer, close, rename, unlink) is returned together in
/// [`PrivageError::Write`], first error first.
pub fn atomic_write<F>(path: &Path, mode: u32, produce: F) -> PrivageResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> PrivageResult<()>,
{
    let tmp = tmp_path(path);
    let file = create_exclusive(&tmp, mode).map_err(|e| PrivageError::Write {
        path: path.to_path_buf(),
        errors: vec![PrivageError::Io(std::io::Error::new(
            e.kind(),
            format!("creating {}: {e}", tmp.display()),
        ))],
    })?;

    let mut errors: Vec<PrivageError> = Vec::new();
    let mut writer = BufWriter::new(file);

    if let Err(e) = produce(&mut writer) {
        errors.push(e);
    }

    // Close: flush the buffer, then sync so the rename publishes durable bytes.
    match writer.into_inner() {
        Ok(file) => {
            if let Err(e) = file.sync_all() {
                errors.push(e.into());
            }
        }
        Err(e) => errors.push(e.into_error().into()),
    }

    if errors.is_empty() {
        match fs::rename(&tmp, path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "atomic write complete");
                return Ok(());
            }
            Err(e) => errors.push(e.into()),
        }
    }

    if let Err(e) = fs::remove_file(&tmp) {
        if e.kind() != std::io::ErrorKind::NotFound {
            errors.push(e.into());
        }
    }

    Err(PrivageError::Write {
        path: path.to_path_buf(),
        errors,
    })
}

/// Convenience wrapper for small in-memory payloads.
pub fn atomic_write_bytes(path: &Path, mode: u32, data: &[u8]) -> PrivageResult<()> {
    atomic_write(path, mode, |w| {
        w.write_all(data)?;
        Ok(())
    })
}
