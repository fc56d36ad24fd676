//! Age identity loading and generation
//!
//! An identity file is either
//!   1. raw: the age secret key text, with `# created:` / `# public key:` comments, or
//!   2. token-wrapped: ASCII85 of that same text encrypted to a hardware
//!      token slot (`identity_type = "PIV"` in the config).
//!
//! Loading never fails outright. The returned [`Identity`] is either ready
//! (key present), failed (the load error is kept), or unresolved (nothing
//! was loaded). Callers check readiness through [`Identity::key`] before
//! any crypto.

use age::x25519;
use privage_core::config::Config;
use privage_core::fsutil;
use privage_core::{PrivageError, PrivageResult, Slot};
use privage_crypto::ascii85;
use secrecy::ExposeSecret;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::token::{self, Token};

/// Marker that identifies raw age key text.
const SECRET_KEY_PREFIX: &str = "AGE-SECRET-KEY-1";

/// How the identity file stores the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Raw,
    Token(Slot),
}

/// A loaded (or failed) age identity
pub struct Identity {
    key: Option<x25519::Identity>,
    path: PathBuf,
    kind: IdentityKind,
    err: Option<PrivageError>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("err", &self.err)
            .finish()
    }
}

impl Identity {
    /// Nothing loaded yet.
    pub fn unresolved(path: &Path) -> Self {
        Self {
            key: None,
            path: path.to_path_buf(),
            kind: IdentityKind::Raw,
            err: None,
        }
    }

    /// A ready identity around an in-memory key.
    pub fn from_key(key: x25519::Identity, path: &Path, kind: IdentityKind) -> Self {
        Self {
            key: Some(key),
            path: path.to_path_buf(),
            kind,
            err: None,
        }
    }

    fn failed(path: &Path, kind: IdentityKind, err: PrivageError) -> Self {
        tracing::debug!(path = %path.display(), error = %err, "identity load failed");
        Self {
            key: None,
            path: path.to_path_buf(),
            kind,
            err: Some(err),
        }
    }

    /// Load a raw key from `reader`. Comment lines (`#`) and blank lines
    /// are skipped.
    pub fn load_raw<R: Read>(mut reader: R, path: &Path) -> Self {
        let mut text = Zeroizing::new(String::new());
        if let Err(e) = reader.read_to_string(&mut text) {
            return Self::failed(path, IdentityKind::Raw, read_error(path, e));
        }
        match parse_key_text(&text) {
            Ok(key) => Self::from_key(key, path, IdentityKind::Raw),
            Err(e) => Self::failed(path, IdentityKind::Raw, e),
        }
    }

    /// Load a token-wrapped key: ASCII85-decode `reader`, then have the
    /// token decrypt the blob with the key in `slot`.
    pub fn load_token<R: Read>(reader: R, path: &Path, token: &mut dyn Token, slot: Slot) -> Self {
        let kind = IdentityKind::Token(slot);
        let mut wrapped = Vec::new();
        if let Err(e) = ascii85::Decoder::new(reader).read_to_end(&mut wrapped) {
            return Self::failed(path, kind, read_error(path, e));
        }

        let plaintext = match token.decrypt(&wrapped, slot) {
            Ok(p) => Zeroizing::new(p),
            Err(e) => return Self::failed(path, kind, e),
        };
        let text = match std::str::from_utf8(&plaintext) {
            Ok(t) => t,
            Err(_) => {
                return Self::failed(
                    path,
                    kind,
                    PrivageError::Identity(format!(
                        "{}: unwrapped key is not UTF-8",
                        path.display()
                    )),
                )
            }
        };
        match parse_key_text(text) {
            Ok(key) => Self::from_key(key, path, kind),
            Err(e) => Self::failed(path, kind, e),
        }
    }

    /// Load either form, telling them apart by content: raw key text
    /// contains the age secret-key marker, anything else is treated as
    /// token-wrapped and needs `slot`.
    pub fn load_auto<R: Read>(
        mut reader: R,
        path: &Path,
        token: &mut dyn Token,
        slot: Option<Slot>,
    ) -> Self {
        let mut content = Zeroizing::new(Vec::new());
        if let Err(e) = reader.read_to_end(&mut content) {
            return Self::failed(path, IdentityKind::Raw, read_error(path, e));
        }
        let is_raw = content
            .windows(SECRET_KEY_PREFIX.len())
            .any(|w| w == SECRET_KEY_PREFIX.as_bytes());
        match (is_raw, slot) {
            (true, _) => Self::load_raw(content.as_slice(), path),
            (false, Some(slot)) => Self::load_token(content.as_slice(), path, token, slot),
            (false, None) => Self::failed(
                path,
                IdentityKind::Raw,
                PrivageError::Identity(format!(
                    "{} is not a raw age key and no token slot was given",
                    path.display()
                )),
            ),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.key.is_some()
    }

    /// The private key, or an identity error explaining why there is none.
    pub fn key(&self) -> PrivageResult<&x25519::Identity> {
        if let Some(key) = &self.key {
            return Ok(key);
        }
        Err(match &self.err {
            Some(PrivageError::Identity(msg)) => PrivageError::Identity(msg.clone()),
            Some(e) => PrivageError::Identity(e.to_string()),
            None => PrivageError::Identity(format!(
                "identity {} not loaded",
                self.path.display()
            )),
        })
    }

    /// The public recipient; only defined for a ready identity.
    pub fn recipient(&self) -> Option<x25519::Recipient> {
        self.key.as_ref().map(|k| k.to_public())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    pub fn error(&self) -> Option<&PrivageError> {
        self.err.as_ref()
    }
}

/// Load the identity named by the config.
///
/// A missing identity file yields a failed identity carrying an
/// [`PrivageError::Identity`]; nothing here panics or returns early.
pub fn load_configured(config: &Config, token: &mut dyn Token) -> Identity {
    let path = config.identity_path();
    let slot = match config.piv_slot() {
        Ok(slot) => slot,
        Err(e) => return Identity::failed(&path, IdentityKind::Raw, e),
    };
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            let kind = slot.map_or(IdentityKind::Raw, IdentityKind::Token);
            return Identity::failed(&path, kind, read_error(&path, e));
        }
    };
    match slot {
        Some(slot) => Identity::load_token(file, &path, token, slot),
        None => Identity::load_raw(file, &path),
    }
}

/// Write a fresh raw identity (comments + key text) to `writer`.
/// Returns the new recipient.
pub fn generate_raw<W: Write + ?Sized>(writer: &mut W) -> PrivageResult<x25519::Recipient> {
    let key = x25519::Identity::generate();
    let text = key_text(&key);
    writer.write_all(text.as_bytes())?;
    Ok(key.to_public())
}

/// Write a fresh token-wrapped identity to `writer`: the raw text form is
/// encrypted by the token to `slot`, then ASCII85-encoded.
pub fn generate_token<W: Write + ?Sized>(
    writer: &mut W,
    token: &mut dyn Token,
    slot: Slot,
) -> PrivageResult<x25519::Recipient> {
    let key = x25519::Identity::generate();
    let text = key_text(&key);
    token::check_plaintext_len(text.as_bytes())?;

    let mut wrapped = Vec::new();
    token.encrypt(&mut wrapped, text.as_bytes(), slot)?;

    writer.write_all(ascii85::encode(&wrapped).as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(key.to_public())
}

/// Create a new identity file at `path`: token-wrapped when `slot` is set,
/// raw otherwise. An existing file is never overwritten.
pub fn create_file(
    path: &Path,
    token: &mut dyn Token,
    slot: Option<Slot>,
) -> PrivageResult<x25519::Recipient> {
    if path.exists() {
        return Err(PrivageError::Identity(format!(
            "{} already exists",
            path.display()
        )));
    }

    let mut recipient = None;
    fsutil::atomic_write(path, fsutil::SECRET_FILE_MODE, |w| {
        let r = match slot {
            Some(slot) => generate_token(w, token, slot)?,
            None => generate_raw(w)?,
        };
        recipient = Some(r);
        Ok(())
    })?;

    tracing::info!(path = %path.display(), token = slot.is_some(), "identity created");
    recipient.ok_or_else(|| PrivageError::Identity("identity generation produced no key".into()))
}

/// Canonical text form of a key, as stored in a raw identity file.
pub fn key_text(key: &x25519::Identity) -> Zeroizing<String> {
    let created = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    Zeroizing::new(format!(
        "# created: {created}\n# public key: {}\n{}\n",
        key.to_public(),
        secret_key_text(key).as_str()
    ))
}

/// The bare `AGE-SECRET-KEY-1...` string.
pub fn secret_key_text(key: &x25519::Identity) -> Zeroizing<String> {
    Zeroizing::new(key.to_string().expose_secret().to_string())
}

fn parse_key_text(text: &str) -> PrivageResult<x25519::Identity> {
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let line = lines
        .next()
        .ok_or_else(|| PrivageError::Identity("no key found in identity file".into()))?;
    if lines.next().is_some() {
        return Err(PrivageError::Identity(
            "identity file holds more than one key".into(),
        ));
    }
    line.parse::<x25519::Identity>()
        .map_err(|e| PrivageError::Identity(format!("parsing age key: {e}")))
}

fn read_error(path: &Path, e: std::io::Error) -> PrivageError {
    PrivageError::Identity(format!("reading identity {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::testing::SoftToken;
    use crate::token::DisabledToken;

    fn raw_identity_text() -> (Vec<u8>, x25519::Recipient) {
        let mut buf = Vec::new();
        let recipient = generate_raw(&mut buf).unwrap();
        (buf, recipient)
    }

    #[test]
    fn test_generate_raw_format() {
        let (buf, recipient) = raw_identity_text();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("# created: "));
        assert!(chrono::DateTime::parse_from_rfc3339(&lines[0]["# created: ".len()..]).is_ok());
        assert_eq!(lines[1], format!("# public key: {recipient}"));
        assert!(lines[2].starts_with(SECRET_KEY_PREFIX));
    }

    #[test]
    fn test_load_raw_roundtrip() {
        let (buf, recipient) = raw_identity_text();
        let identity = Identity::load_raw(buf.as_slice(), Path::new("privage-key.txt"));

        assert!(identity.is_ready());
        assert_eq!(identity.recipient().unwrap().to_string(), recipient.to_string());
        assert_eq!(identity.kind(), IdentityKind::Raw);
    }

    #[test]
    fn test_load_raw_garbage_sets_error() {
        let identity = Identity::load_raw(&b"# only a comment\n"[..], Path::new("k.txt"));

        assert!(!identity.is_ready());
        assert!(identity.error().is_some());
        assert!(identity.recipient().is_none());
        assert!(matches!(identity.key(), Err(PrivageError::Identity(_))));
    }

    #[test]
    fn test_unresolved_is_not_ready() {
        let identity = Identity::unresolved(Path::new("k.txt"));
        assert!(!identity.is_ready());
        assert!(identity.error().is_none());
        assert!(identity.key().is_err());
    }

    #[test]
    fn test_token_roundtrip() {
        let slot = Slot(0x9a);
        let mut token = SoftToken::with_slot(slot);
        let mut buf = Vec::new();
        let recipient = generate_token(&mut buf, &mut token, slot).unwrap();

        // stored form is ASCII85, not key text
        let stored = String::from_utf8(buf.clone()).unwrap();
        assert!(!stored.contains(SECRET_KEY_PREFIX));

        let identity = Identity::load_token(buf.as_slice(), Path::new("k.txt"), &mut token, slot);
        assert!(identity.is_ready(), "{:?}", identity.error());
        assert_eq!(identity.recipient().unwrap().to_string(), recipient.to_string());
        assert_eq!(identity.kind(), IdentityKind::Token(slot));
    }

    #[test]
    fn test_token_disabled_sets_error() {
        let slot = Slot(0x9a);
        let mut soft = SoftToken::with_slot(slot);
        let mut buf = Vec::new();
        generate_token(&mut buf, &mut soft, slot).unwrap();

        let identity =
            Identity::load_token(buf.as_slice(), Path::new("k.txt"), &mut DisabledToken, slot);
        assert!(!identity.is_ready());
        assert!(matches!(identity.error(), Some(PrivageError::TokenDisabled)));
    }

    #[test]
    fn test_load_auto_detects_form() {
        let slot = Slot(0x9a);
        let mut token = SoftToken::with_slot(slot);

        let (raw, _) = raw_identity_text();
        let identity = Identity::load_auto(raw.as_slice(), Path::new("k"), &mut token, None);
        assert_eq!(identity.kind(), IdentityKind::Raw);
        assert!(identity.is_ready());

        let mut wrapped = Vec::new();
        generate_token(&mut wrapped, &mut token, slot).unwrap();
        let identity = Identity::load_auto(wrapped.as_slice(), Path::new("k"), &mut token, Some(slot));
        assert_eq!(identity.kind(), IdentityKind::Token(slot));
        assert!(identity.is_ready());

        let identity = Identity::load_auto(wrapped.as_slice(), Path::new("k"), &mut token, None);
        assert!(!identity.is_ready());
    }

    #[test]
    fn test_load_configured_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            identity_path: dir.path().join("missing.txt"),
            ..Config::default()
        };
        let identity = load_configured(&config, &mut DisabledToken);

        assert!(!identity.is_ready());
        assert!(matches!(identity.error(), Some(PrivageError::Identity(_))));

        let message = identity.key().err().unwrap().to_string();
        assert_eq!(message.matches("identity error").count(), 1, "{message}");
        assert!(message.contains("missing.txt"), "{message}");
    }

    #[test]
    fn test_create_file_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("privage-key.txt");

        let recipient = create_file(&path, &mut DisabledToken, None).unwrap();
        let identity = Identity::load_raw(File::open(&path).unwrap(), &path);
        assert_eq!(identity.recipient().unwrap().to_string(), recipient.to_string());

        let err = create_file(&path, &mut DisabledToken, None).unwrap_err();
        assert!(matches!(err, PrivageError::Identity(_)));
    }

    #[test]
    fn test_create_file_token_disabled_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("privage-key.txt");

        let err = create_file(&path, &mut DisabledToken, Some(Slot(0x9a))).unwrap_err();
        assert!(matches!(err, PrivageError::Write { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_debug_redacts_key() {
        let (buf, _) = raw_identity_text();
        let identity = Identity::load_raw(buf.as_slice(), Path::new("k"));
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(SECRET_KEY_PREFIX));
    }
}
