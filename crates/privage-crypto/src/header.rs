//! Fixed-size metadata header and its 512-byte encrypted framing
//!
//! Plaintext layout (245 bytes, every field right-justified and left-padded
//! with spaces):
//! ```text
//! [ version: 5 ][ category: 40 ][ label: 200 ]
//! ```
//!
//! Once encrypted, the ciphertext is left-padded with spaces up to
//! [`BLOCK_LEN`] bytes. The age format marker that starts every age file
//! tells the decoder where the padding ends, so a scanner can read exactly
//! 512 bytes from any file and recover the metadata without reading the body.

use privage_core::{PrivageError, PrivageResult};

/// Current header version.
pub const VERSION: &str = "v1";

pub const VERSION_LEN: usize = 5;
pub const CATEGORY_LEN: usize = 40;
pub const LABEL_LEN: usize = 200;

/// Length of the serialized plaintext header.
pub const HEADER_LEN: usize = VERSION_LEN + CATEGORY_LEN + LABEL_LEN;

/// Size of the padded encrypted header block at the start of every file.
pub const BLOCK_LEN: usize = 512;

/// Literal every binary age ciphertext begins with.
pub const AGE_PREFIX: &[u8] = b"age-encryption.org/v1";

const PAD: u8 = b' ';

/// Metadata describing one encrypted file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Header {
    pub version: String,
    pub category: String,
    pub label: String,
}

impl Header {
    /// A current-version header.
    pub fn new(category: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            version: VERSION.to_string(),
            category: category.into(),
            label: label.into(),
        }
    }

    /// Same category and label (version is not compared).
    pub fn same_secret(&self, other: &Header) -> bool {
        self.category == other.category && self.label == other.label
    }
}

/// Serialize a header into its fixed 245-byte form.
///
/// Fails with [`PrivageError::FieldOverflow`] if a field's UTF-8 length
/// exceeds its slot.
pub fn pad(header: &Header) -> PrivageResult<[u8; HEADER_LEN]> {
    let mut out = [PAD; HEADER_LEN];
    put_field(&mut out[..VERSION_LEN], "version", &header.version)?;
    put_field(
        &mut out[VERSION_LEN..VERSION_LEN + CATEGORY_LEN],
        "category",
        &header.category,
    )?;
    put_field(
        &mut out[VERSION_LEN + CATEGORY_LEN..],
        "label",
        &header.label,
    )?;
    Ok(out)
}

fn put_field(slot: &mut [u8], name: &'static str, value: &str) -> PrivageResult<()> {
    let bytes = value.as_bytes();
    if bytes.len() > slot.len() {
        return Err(PrivageError::FieldOverflow {
            field: name,
            len: bytes.len(),
            max: slot.len(),
        });
    }
    let start = slot.len() - bytes.len();
    slot[start..].copy_from_slice(bytes);
    Ok(())
}

/// Parse a 245-byte header. Never fails: each field is read at its fixed
/// offset and stripped of leading spaces.
pub fn parse(bytes: &[u8; HEADER_LEN]) -> Header {
    Header {
        version: take_field(&bytes[..VERSION_LEN]),
        category: take_field(&bytes[VERSION_LEN..VERSION_LEN + CATEGORY_LEN]),
        label: take_field(&bytes[VERSION_LEN + CATEGORY_LEN..]),
    }
}

fn take_field(slot: &[u8]) -> String {
    let start = slot.iter().position(|b| *b != PAD).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[start..]).into_owned()
}

/// Left-pad an encrypted header to exactly [`BLOCK_LEN`] bytes.
pub fn pad_encrypted(encrypted: &[u8]) -> PrivageResult<[u8; BLOCK_LEN]> {
    if encrypted.len() > BLOCK_LEN {
        return Err(PrivageError::FieldOverflow {
            field: "encrypted header",
            len: encrypted.len(),
            max: BLOCK_LEN,
        });
    }
    let mut block = [PAD; BLOCK_LEN];
    block[BLOCK_LEN - encrypted.len()..].copy_from_slice(encrypted);
    Ok(block)
}

/// Strip the padding from an encrypted header block.
///
/// Returns the slice starting at the first occurrence of [`AGE_PREFIX`].
/// Fails with [`PrivageError::HeaderCorruption`] if the prefix is missing
/// or any byte before it is not a space.
pub fn unpad(block: &[u8]) -> PrivageResult<&[u8]> {
    let start = block
        .windows(AGE_PREFIX.len())
        .position(|w| w == AGE_PREFIX)
        .ok_or_else(|| PrivageError::HeaderCorruption("age prefix not found".into()))?;

    if let Some(bad) = block[..start].iter().position(|b| *b != PAD) {
        return Err(PrivageError::HeaderCorruption(format!(
            "non-padding byte 0x{:02x} at offset {bad}",
            block[bad]
        )));
    }
    Ok(&block[start..])
}
