//! Hardware token capability
//!
//! The core only needs a PIV-like token to encrypt and decrypt short blobs
//! (an age key, well under the RSA-2048 plaintext limit) with the key held
//! in a slot. The driver is opaque behind [`Token`]; builds without token
//! support use [`DisabledToken`], which refuses every operation.

use privage_core::{PrivageError, PrivageResult, Slot};
use std::io::Write;

/// Largest plaintext an RSA-2048 PKCS#1 v1.5 slot key can wrap.
pub const MAX_PLAINTEXT_LEN: usize = 245;

/// Minimal capability of a hardware token.
pub trait Token {
    /// Encrypt `plaintext` to the public key in `slot`, writing the
    /// ciphertext to `out`.
    fn encrypt(&mut self, out: &mut dyn Write, plaintext: &[u8], slot: Slot) -> PrivageResult<()>;

    /// Decrypt `ciphertext` with the private key in `slot`.
    fn decrypt(&mut self, ciphertext: &[u8], slot: Slot) -> PrivageResult<Vec<u8>>;

    /// Release the device.
    fn close(&mut self) -> PrivageResult<()>;
}

/// Token stand-in for builds without a token driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledToken;

impl Token for DisabledToken {
    fn encrypt(&mut self, _out: &mut dyn Write, _plaintext: &[u8], _slot: Slot) -> PrivageResult<()> {
        Err(PrivageError::TokenDisabled)
    }

    fn decrypt(&mut self, _ciphertext: &[u8], _slot: Slot) -> PrivageResult<Vec<u8>> {
        Err(PrivageError::TokenDisabled)
    }

    fn close(&mut self) -> PrivageResult<()> {
        Ok(())
    }
}

/// Open the token driver compiled into this build.
pub fn open() -> PrivageResult<Box<dyn Token>> {
    tracing::debug!("no token driver compiled in, using disabled token");
    Ok(Box::new(DisabledToken))
}

/// Reject blobs a slot key could not wrap.
pub fn check_plaintext_len(plaintext: &[u8]) -> PrivageResult<()> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(PrivageError::Token(format!(
            "plaintext is {} bytes, token limit is {MAX_PLAINTEXT_LEN}",
            plaintext.len()
        )));
    }
    Ok(())
}
