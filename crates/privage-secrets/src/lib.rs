//! privage-secrets: the repository engine
//!
//! A repository is a flat directory of `.age` files, each holding one secret:
//! a 512-byte encrypted metadata block followed by the encrypted body, both
//! encrypted to the same age recipient.
//!
//! Data flow:
//!   ops (`repo`, `rotate`) → `scan` (decrypt every header block) → pick by label
//!   → open file, skip 512 bytes, stream-decrypt body
//!
//! Writes always go through `save::encrypt_save`, which publishes files with
//! `privage_core::fsutil::atomic_write`.

pub mod age;
pub mod clipboard;
pub mod credential;
pub mod identity;
pub mod repo;
pub mod rotate;
pub mod save;
pub mod scan;
pub mod token;

pub use clipboard::{Clipboard, MemoryClipboard, SystemClipboard};
pub use credential::Credential;
pub use identity::{Identity, IdentityKind};
pub use repo::{AddReport, Listing, ReencryptOptions, ReencryptReport, Repository};
pub use rotate::{rotate, RotateOptions, RotateReport};
pub use save::encrypt_save;
pub use scan::{scan, Entry, ScanError, ScanFailure, ScanItem, Scanner};
pub use token::{DisabledToken, Token};

/// Category whose bodies are TOML credentials.
pub const CREDENTIAL_CATEGORY: &str = "credential";
