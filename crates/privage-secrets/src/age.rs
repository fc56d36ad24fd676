//! age encryption helpers (age 0.11 API)
//!
//! Thin wrappers that map age errors into the privage taxonomy. In
//! particular a ciphertext addressed to someone else surfaces as
//! [`PrivageError::NoMatchingIdentity`], which rotation relies on to tell
//! "already rotated" files apart from damaged ones.

use age::x25519;
use privage_core::{PrivageError, PrivageResult};
use std::io::{Read, Write};

pub use age::stream::{StreamReader, StreamWriter};

/// Encrypt a small in-memory buffer to one recipient.
pub fn encrypt_to(recipient: &x25519::Recipient, plaintext: &[u8]) -> PrivageResult<Vec<u8>> {
    let mut encrypted = Vec::with_capacity(plaintext.len() + 256);
    let mut writer = encrypting_writer(recipient, &mut encrypted)?;
    writer.write_all(plaintext)?;
    writer.finish()?;
    Ok(encrypted)
}

/// Fresh encryptions tried by [`encrypt_within`] before giving up.
const FIT_ATTEMPTS: usize = 128;

/// Encrypt `plaintext` to `recipient` with a ciphertext of at most `limit`
/// bytes.
///
/// age appends a random-length grease stanza to every header, so the
/// ciphertext of a fixed-size plaintext varies by about 150 bytes between
/// runs. Each attempt uses a fresh file key; the shortest overshoot is
/// reported if none fits.
pub fn encrypt_within(
    recipient: &x25519::Recipient,
    plaintext: &[u8],
    limit: usize,
) -> PrivageResult<Vec<u8>> {
    let mut shortest = usize::MAX;
    for attempt in 1..=FIT_ATTEMPTS {
        let ciphertext = encrypt_to(recipient, plaintext)?;
        if ciphertext.len() <= limit {
            tracing::trace!(attempt, len = ciphertext.len(), "ciphertext fits");
            return Ok(ciphertext);
        }
        shortest = shortest.min(ciphertext.len());
    }
    Err(PrivageError::FieldOverflow {
        field: "encrypted header",
        len: shortest,
        max: limit,
    })
}

/// Wrap `output` in an age stream encrypting to `recipient`.
///
/// The caller must call `finish()` on the returned writer; dropping it
/// without finishing produces a truncated ciphertext.
pub fn encrypting_writer<W: Write>(
    recipient: &x25519::Recipient,
    output: W,
) -> PrivageResult<StreamWriter<W>> {
    let encryptor =
        age::Encryptor::with_recipients(std::iter::once(recipient as &dyn age::Recipient))
            .map_err(|e| PrivageError::Other(anyhow::anyhow!("creating age encryptor: {e}")))?;
    Ok(encryptor.wrap_output(output)?)
}

/// Decrypt a small in-memory ciphertext.
pub fn decrypt_with(identity: &x25519::Identity, ciphertext: &[u8]) -> PrivageResult<Vec<u8>> {
    let mut reader = decrypting_reader(identity, ciphertext)?;
    let mut plaintext = Vec::new();
    reader
        .read_to_end(&mut plaintext)
        .map_err(|e| PrivageError::Decrypt(format!("reading decrypted data: {e}")))?;
    Ok(plaintext)
}

/// Wrap `input` in an age stream decrypting with `identity`.
pub fn decrypting_reader<R: Read>(
    identity: &x25519::Identity,
    input: R,
) -> PrivageResult<StreamReader<R>> {
    let decryptor = age::Decryptor::new(input).map_err(map_decrypt_error)?;

    // Reject passphrase-protected files
    if decryptor.is_scrypt() {
        return Err(PrivageError::Decrypt(
            "passphrase-encrypted files are not supported".into(),
        ));
    }

    decryptor
        .decrypt(std::iter::once(identity as &dyn age::Identity))
        .map_err(map_decrypt_error)
}

fn map_decrypt_error(e: age::DecryptError) -> PrivageError {
    match e {
        age::DecryptError::NoMatchingKeys => PrivageError::NoMatchingIdentity,
        other => PrivageError::Decrypt(other.to_string()),
    }
}
