use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PrivageError;

/// A key slot on a PIV-style hardware token (e.g. `0x9a`).
///
/// Parsed from and displayed as lowercase hex without a `0x` prefix, the
/// form used in the config file and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot(pub u32);

impl FromStr for Slot {
    type Err = PrivageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return Err(PrivageError::Config("empty PIV slot".into()));
        }
        u32::from_str_radix(digits, 16)
            .map(Slot)
            .map_err(|e| PrivageError::Config(format!("invalid PIV slot '{s}': {e}")))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}
