use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PrivageError, PrivageResult};
use crate::fsutil;
use crate::types::Slot;

/// Canonical identity file name.
pub const IDENTITY_FILE: &str = "privage-key.txt";

/// Config file name looked up in the current directory, then in `$HOME`.
pub const CONFIG_FILE: &str = ".privage.conf";

/// `identity_type` value for token-wrapped identities.
pub const IDENTITY_TYPE_PIV: &str = "PIV";

/// Persisted privage configuration (loaded from `.privage.conf`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity file (raw age key text, or ASCII85 of a token-wrapped key)
    pub identity_path: PathBuf,
    /// "" for a raw key, "PIV" for a token-wrapped key
    pub identity_type: String,
    /// Token slot as hex without `0x` (e.g. "9a"); only read for PIV identities
    pub identity_piv_slot: String,
    /// Directory holding the encrypted files
    pub secrets_repository_path: PathBuf,
    /// Login written into newly generated credentials
    pub default_login: String,
    /// Email written into newly generated credentials
    pub default_email: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity_path: PathBuf::from(IDENTITY_FILE),
            identity_type: String::new(),
            identity_piv_slot: String::new(),
            secrets_repository_path: PathBuf::from("."),
            default_login: String::new(),
            default_email: String::new(),
        }
    }
}

impl Config {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> PrivageResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PrivageError::Config(format!("reading config {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| PrivageError::Config(format!("parsing config {}: {e}", path.display())))
    }

    /// Write the config through the atomic-write path.
    pub fn save(&self, path: &Path) -> PrivageResult<()> {
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| PrivageError::Config(format!("serializing config: {e}")))?;
        fsutil::atomic_write_bytes(path, fsutil::SECRET_FILE_MODE, rendered.as_bytes())
    }

    /// Identity file path with `~/` expanded.
    pub fn identity_path(&self) -> PathBuf {
        expand_tilde(&self.identity_path)
    }

    /// Repository path with `~/` expanded.
    pub fn repository_path(&self) -> PathBuf {
        expand_tilde(&self.secrets_repository_path)
    }

    pub fn uses_token(&self) -> bool {
        self.identity_type.eq_ignore_ascii_case(IDENTITY_TYPE_PIV)
    }

    /// The configured token slot, if this is a token-wrapped identity.
    pub fn piv_slot(&self) -> PrivageResult<Option<Slot>> {
        if !self.uses_token() {
            return Ok(None);
        }
        if self.identity_piv_slot.is_empty() {
            return Err(PrivageError::Config(
                "identity_type is PIV but identity_piv_slot is empty".into(),
            ));
        }
        self.identity_piv_slot.parse().map(Some)
    }
}

/// Locate the config file: explicit path first, then `./.privage.conf`,
/// then `~/.privage.conf`. Returns `None` when nothing exists.
pub fn discover(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    let home = home_dir().join(CONFIG_FILE);
    if home.exists() {
        return Some(home);
    }
    None
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(rest) = s.strip_prefix("~/") {
            return home_dir().join(rest);
        }
    }
    path.to_path_buf()
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
