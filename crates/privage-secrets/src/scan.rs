//! Repository header scanner
//!
//! Enumerates the `.age` files directly inside a repository (no recursion)
//! and, one file per pull, reads the fixed 512-byte header block and
//! decrypts it. Failures are carried in the yielded item so one bad file
//! never stops a scan. The body of a file is never read here.
//!
//! Candidate names are snapshotted and sorted when the scan starts, so the
//! order is stable and files written during the scan (rotation) are not
//! picked up by it. No file descriptor is held between pulls, so a consumer
//! may stop early.

use age::x25519;
use privage_core::{PrivageError, PrivageResult};
use privage_crypto::header::{self, Header, BLOCK_LEN, HEADER_LEN};
use privage_crypto::names;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::identity::Identity;

/// A header found in the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub header: Header,
    pub path: PathBuf,
}

/// Why one file's header could not be recovered
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("could not open file: {0}")]
    Open(std::io::Error),

    #[error("could not read header")]
    ShortHeader,

    #[error("could not unpad header: {0}")]
    Unpad(PrivageError),

    #[error("no matching identity")]
    NoMatchingIdentity,

    #[error("could not decrypt header: {0}")]
    Decrypt(PrivageError),

    #[error("decrypted header is {0} bytes, expected {HEADER_LEN}")]
    Malformed(usize),
}

impl ScanError {
    /// The file belongs to another recipient (e.g. already rotated).
    pub fn is_no_matching_identity(&self) -> bool {
        matches!(self, ScanError::NoMatchingIdentity)
    }
}

/// A file whose header could not be recovered
#[derive(Debug, Error)]
#[error("{}: {error}", .path.display())]
pub struct ScanFailure {
    pub path: PathBuf,
    pub error: ScanError,
}

pub type ScanItem = Result<Entry, ScanFailure>;

/// Lazy header scan over a snapshot of candidate files
pub struct Scanner<'a> {
    key: &'a x25519::Identity,
    candidates: std::vec::IntoIter<PathBuf>,
}

/// Start scanning `repo` with `identity`.
///
/// Fails only if the identity is not ready or the directory cannot be
/// listed; everything per-file is reported through the items.
pub fn scan<'a>(repo: &Path, identity: &'a Identity) -> PrivageResult<Scanner<'a>> {
    let key = identity.key()?;
    let candidates = candidates(repo)?;
    tracing::debug!(repo = %repo.display(), files = candidates.len(), "scanning headers");
    Ok(Scanner {
        key,
        candidates: candidates.into_iter(),
    })
}

impl Scanner<'_> {
    /// Number of files not yet visited.
    pub fn remaining(&self) -> usize {
        self.candidates.len()
    }
}

impl Iterator for Scanner<'_> {
    type Item = ScanItem;

    fn next(&mut self) -> Option<ScanItem> {
        let path = self.candidates.next()?;
        let item = match read_header(&path, self.key) {
            Ok(header) => Ok(Entry { header, path }),
            Err(error) => {
                tracing::debug!(path = %path.display(), %error, "header scan failed");
                Err(ScanFailure { path, error })
            }
        };
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.candidates.size_hint()
    }
}

/// Regular files directly in `repo` whose names end in `.age`, sorted.
pub fn candidates(repo: &Path) -> PrivageResult<Vec<PathBuf>> {
    let entries = fs::read_dir(repo).map_err(|e| {
        PrivageError::Config(format!("reading repository {}: {e}", repo.display()))
    })?;

    let mut paths: Vec<PathBuf> = entries.filter_map(candidate).collect();
    paths.sort();
    Ok(paths)
}

/// The path of one directory entry if it looks like an encrypted file.
///
/// Unreadable entries are skipped with a warning. An entry whose type
/// cannot be read is kept, so the failure surfaces as a [`ScanFailure`].
fn candidate(entry: io::Result<fs::DirEntry>) -> Option<PathBuf> {
    let entry = match entry {
        Ok(entry) => entry,
        Err(error) => {
            tracing::warn!(%error, "skipping unreadable repository entry");
            return None;
        }
    };
    let name = entry.file_name();
    if !names::is_encrypted_name(name.to_str()?) {
        return None;
    }
    match entry.file_type() {
        Ok(file_type) if file_type.is_file() => Some(entry.path()),
        Ok(_) => None,
        Err(error) => {
            tracing::debug!(path = %entry.path().display(), %error, "file type unavailable");
            Some(entry.path())
        }
    }
}

/// Read and decrypt the header block of one file.
pub fn read_header(path: &Path, key: &x25519::Identity) -> Result<Header, ScanError> {
    let mut file = File::open(path).map_err(ScanError::Open)?;
    let mut block = [0u8; BLOCK_LEN];
    file.read_exact(&mut block)
        .map_err(|_| ScanError::ShortHeader)?;
    drop(file);

    let encrypted = header::unpad(&block).map_err(ScanError::Unpad)?;
    let plaintext = crate::age::decrypt_with(key, encrypted).map_err(|e| match e {
        PrivageError::NoMatchingIdentity => ScanError::NoMatchingIdentity,
        other => ScanError::Decrypt(other),
    })?;

    let fixed: &[u8; HEADER_LEN] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| ScanError::Malformed(plaintext.len()))?;
    Ok(header::parse(fixed))
}
