//! Shared fixtures for the repository integration tests.

#![allow(dead_code)]

use age::x25519;
use privage_core::config::{Config, IDENTITY_FILE};
use privage_core::{PrivageError, PrivageResult, Slot};
use privage_secrets::identity;
use privage_secrets::{DisabledToken, Identity, Repository, Token};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A freshly initialized repository with a raw identity inside it.
pub struct Fixture {
    pub dir: TempDir,
    pub repo: Repository,
    pub config: Config,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config {
            identity_path: dir.path().join(IDENTITY_FILE),
            secrets_repository_path: dir.path().to_path_buf(),
            default_login: "jdoe".into(),
            default_email: "jdoe@example.com".into(),
            ..Config::default()
        };
        identity::create_file(&config.identity_path(), &mut DisabledToken, None).unwrap();
        let repo = Repository::from_config(&config);
        Self { dir, repo, config }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn key_path(&self) -> PathBuf {
        self.config.identity_path()
    }

    /// (Re)load the identity at the canonical path.
    pub fn identity(&self) -> Identity {
        let identity = identity::load_configured(&self.config, &mut DisabledToken);
        assert!(identity.is_ready(), "{:?}", identity.error());
        identity
    }

    pub fn write_plain(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Names of the `.age` files in the repository, sorted.
    pub fn age_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".age"))
            .collect();
        names.sort();
        names
    }

    pub fn load_identity_at(&self, path: &Path) -> Identity {
        Identity::load_raw(File::open(path).unwrap(), path)
    }
}

/// Token whose slots hold age keys, for exercising token-wrapped identities.
#[derive(Default)]
pub struct SoftToken {
    slots: HashMap<Slot, x25519::Identity>,
}

impl SoftToken {
    pub fn with_slot(slot: Slot) -> Self {
        let mut token = Self::default();
        token.slots.insert(slot, x25519::Identity::generate());
        token
    }

    fn key(&self, slot: Slot) -> PrivageResult<&x25519::Identity> {
        self.slots
            .get(&slot)
            .ok_or_else(|| PrivageError::Token(format!("empty slot {slot}")))
    }
}

impl Token for SoftToken {
    fn encrypt(&mut self, out: &mut dyn Write, plaintext: &[u8], slot: Slot) -> PrivageResult<()> {
        let recipient = self.key(slot)?.to_public();
        out.write_all(&privage_secrets::age::encrypt_to(&recipient, plaintext)?)?;
        Ok(())
    }

    fn decrypt(&mut self, ciphertext: &[u8], slot: Slot) -> PrivageResult<Vec<u8>> {
        privage_secrets::age::decrypt_with(self.key(slot)?, ciphertext)
    }

    fn close(&mut self) -> PrivageResult<()> {
        Ok(())
    }
}
