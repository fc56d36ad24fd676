//! Content-addressed file names
//!
//! A file's name is a SHA-256 of its plaintext metadata and the recipient it
//! is encrypted to, so the same secret under the same key always lands on
//! the same path, and a new key (rotation) always lands somewhere else.
//! The name reveals nothing about the label without the recipient.

use sha2::{Digest, Sha256};

/// Extension of every encrypted file in a repository.
pub const EXTENSION: &str = ".age";

/// Name suffix marking a file re-encrypted by an unfinished rotation.
pub const ROTATE_SUFFIX: &str = ".rotate";

const SEPARATOR: u8 = 0x1f;

/// Lowercase hex SHA-256 of `category 0x1F label 0x1F recipient` (64 chars).
pub fn name_hash(category: &str, label: &str, recipient: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(category.as_bytes());
    hasher.update([SEPARATOR]);
    hasher.update(label.as_bytes());
    hasher.update([SEPARATOR]);
    hasher.update(recipient.as_bytes());
    hex::encode(hasher.finalize())
}

/// Full file name: `<hash><suffix>.age`.
pub fn file_name(category: &str, label: &str, recipient: &str, suffix: &str) -> String {
    format!("{}{suffix}{EXTENSION}", name_hash(category, label, recipient))
}

/// True for file names the repository scanner considers.
pub fn is_encrypted_name(name: &str) -> bool {
    name.len() > EXTENSION.len() && name.ends_with(EXTENSION)
}

/// `<hash>.rotate.age` → `<hash>.age`; `None` for names without the suffix.
pub fn strip_rotate_suffix(name: &str) -> Option<String> {
    let stem = name.strip_suffix(EXTENSION)?;
    let base = stem.strip_suffix(ROTATE_SUFFIX)?;
    Some(format!("{base}{EXTENSION}"))
}
