//! Encrypt-save: the only writer of `.age` files
//!
//! ```text
//! header ──pad──▶ 245 B ──age──▶ ≤512 B ──pad_encrypted──▶ 512 B ─┐
//!                                                                 ├─▶ atomic_write(<hash><suffix>.age)
//! body reader ───────────────────────age stream──────────────────┘
//! ```

use privage_core::fsutil::{self, SECRET_FILE_MODE};
use privage_core::{PrivageError, PrivageResult};
use privage_crypto::header::{self, Header};
use privage_crypto::names;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::identity::Identity;
use crate::scan;

/// Encrypt `header` and `body` to the identity's recipient and publish the
/// result in `repo` as `<hash><suffix>.age`. Returns the final path.
///
/// An existing file at that name is replaced only if its header decrypts to
/// the same category and label; anything else is a
/// [`PrivageError::Collision`].
pub fn encrypt_save<R: Read>(
    repo: &Path,
    header: &Header,
    suffix: &str,
    mut body: R,
    identity: &Identity,
) -> PrivageResult<PathBuf> {
    let key = identity.key()?;
    let recipient = key.to_public();

    let plain_header = header::pad(header)?;
    let encrypted_header =
        crate::age::encrypt_within(&recipient, &plain_header, header::BLOCK_LEN)?;
    let block = header::pad_encrypted(&encrypted_header)?;

    let name = names::file_name(
        &header.category,
        &header.label,
        &recipient.to_string(),
        suffix,
    );
    let path = repo.join(name);
    check_collision(&path, header, key)?;

    fsutil::atomic_write(&path, SECRET_FILE_MODE, |w| {
        w.write_all(&block)?;
        let mut stream = crate::age::encrypting_writer(&recipient, w)?;
        io::copy(&mut body, &mut stream)?;
        stream.finish()?;
        Ok(())
    })?;

    tracing::debug!(
        path = %path.display(),
        category = %header.category,
        "encrypted file saved"
    );
    Ok(path)
}

fn check_collision(path: &Path, header: &Header, key: &age::x25519::Identity) -> PrivageResult<()> {
    if !path.exists() {
        return Ok(());
    }
    match scan::read_header(path, key) {
        Ok(existing) if existing.same_secret(header) => Ok(()),
        Ok(existing) => Err(PrivageError::Collision {
            path: path.to_path_buf(),
            existing: format!("{}/{}", existing.category, existing.label),
        }),
        Err(e) => Err(PrivageError::Collision {
            path: path.to_path_buf(),
            existing: e.to_string(),
        }),
    }
}
