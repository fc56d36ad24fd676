//! Repository operations
//!
//! Every operation locates its target by scanning headers and matching on
//! the label; bodies are only opened once a match is found. Per-file scan
//! failures are logged and skipped here, they never abort an operation.

use age::x25519;
use privage_core::config::Config;
use privage_core::fsutil::{self, SECRET_FILE_MODE};
use privage_core::{PrivageError, PrivageResult};
use privage_crypto::header::{Header, BLOCK_LEN};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::age::StreamReader;
use crate::clipboard::Clipboard;
use crate::credential::Credential;
use crate::identity::Identity;
use crate::save::encrypt_save;
use crate::scan::{self, Entry, ScanItem, Scanner};
use crate::CREDENTIAL_CATEGORY;

/// A secrets repository: one flat directory of `.age` files.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
    default_login: String,
    default_email: String,
}

/// Outcome of [`Repository::add`].
#[derive(Debug, Clone)]
pub struct AddReport {
    pub header: Header,
    pub path: PathBuf,
}

/// Outcome of [`Repository::list`].
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub filter: Option<String>,
    /// Every header when unfiltered, otherwise headers whose category matched
    pub by_category: Vec<Header>,
    /// Headers whose label (but not category) matched the filter
    pub by_label: Vec<Header>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReencryptOptions {
    pub force: bool,
    pub clean: bool,
}

/// Outcome of [`Repository::reencrypt`].
#[derive(Debug, Clone, Default)]
pub struct ReencryptReport {
    /// Headers whose label exists as a plaintext file in the repository
    pub candidates: Vec<Header>,
    /// Nothing was written (neither force nor clean)
    pub dry_run: bool,
    pub written: Vec<PathBuf>,
    /// Plaintext sources removed after a successful write
    pub removed: Vec<PathBuf>,
}

impl Repository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_login: String::new(),
            default_email: String::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.repository_path(),
            default_login: config.default_login.clone(),
            default_email: config.default_email.clone(),
        }
    }

    /// Defaults written into generated credentials.
    pub fn with_defaults(mut self, login: &str, email: &str) -> Self {
        self.default_login = login.to_string();
        self.default_email = email.to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── scanning ─────────────────────────────────────────────────────────

    pub fn scan<'a>(&self, identity: &'a Identity) -> PrivageResult<Scanner<'a>> {
        scan::scan(&self.root, identity)
    }

    /// Every header decryptable by `identity`.
    pub fn entries(&self, identity: &Identity) -> PrivageResult<Vec<Entry>> {
        Ok(self.scan(identity)?.filter_map(readable).collect())
    }

    /// Number of files decryptable by `identity`.
    pub fn count(&self, identity: &Identity) -> PrivageResult<usize> {
        Ok(self.scan(identity)?.filter_map(readable).count())
    }

    /// First file whose label is `label`. Stops scanning at the match.
    pub fn find(&self, identity: &Identity, label: &str) -> PrivageResult<Option<Entry>> {
        Ok(self
            .scan(identity)?
            .filter_map(readable)
            .find(|e| e.header.label == label))
    }

    fn require(&self, identity: &Identity, label: &str) -> PrivageResult<Entry> {
        self.find(identity, label)?
            .ok_or_else(|| PrivageError::NotFound(label.to_string()))
    }

    /// Decrypting reader over the body of `entry`.
    pub fn open_body(
        &self,
        identity: &Identity,
        entry: &Entry,
    ) -> PrivageResult<StreamReader<File>> {
        open_body(&entry.path, identity.key()?)
    }

    // ── mutating ops ─────────────────────────────────────────────────────

    /// Encrypt a new secret. A `credential` gets a freshly generated body;
    /// any other category encrypts the file named `label` in the repository.
    pub fn add(&self, identity: &Identity, category: &str, label: &str) -> PrivageResult<AddReport> {
        identity.key()?;
        if self.find(identity, label)?.is_some() {
            return Err(PrivageError::LabelExists(label.to_string()));
        }

        let header = Header::new(category, label);
        let path = if category == CREDENTIAL_CATEGORY {
            let credential = Credential::generate(&self.default_login, &self.default_email);
            let body = Zeroizing::new(credential.to_toml()?);
            encrypt_save(&self.root, &header, "", body.as_bytes(), identity)?
        } else {
            let source = self.plain_file(label)?;
            let file = File::open(&source).map_err(|e| {
                PrivageError::NotFound(format!("{}: {e}", source.display()))
            })?;
            encrypt_save(&self.root, &header, "", file, identity)?
        };

        tracing::info!(category, label, path = %path.display(), "secret added");
        Ok(AddReport { header, path })
    }

    /// Remove the file holding `label`. `Ok(None)` when there is no such label.
    pub fn delete(&self, identity: &Identity, label: &str) -> PrivageResult<Option<PathBuf>> {
        let Some(entry) = self.find(identity, label)? else {
            return Ok(None);
        };
        fs::remove_file(&entry.path)?;
        tracing::info!(label, path = %entry.path.display(), "secret deleted");
        Ok(Some(entry.path))
    }

    /// Write the decrypted body of `label` to a file of that name in the
    /// repository.
    pub fn decrypt(&self, identity: &Identity, label: &str) -> PrivageResult<PathBuf> {
        let entry = self.require(identity, label)?;
        let target = self.plain_file(label)?;
        if target == entry.path {
            return Err(PrivageError::Validation(format!(
                "refusing to overwrite encrypted file {}",
                entry.path.display()
            )));
        }

        let mut body = self.open_body(identity, &entry)?;
        fsutil::atomic_write(&target, SECRET_FILE_MODE, |w| {
            io::copy(&mut body, w).map_err(body_error)?;
            Ok(())
        })?;
        tracing::info!(label, path = %target.display(), "secret decrypted to disk");
        Ok(target)
    }

    /// Re-encrypt every secret whose label also exists as a plaintext file
    /// in the repository. Without `force` or `clean` only reports the
    /// candidates. Credential sources are all validated before the first
    /// write.
    pub fn reencrypt(
        &self,
        identity: &Identity,
        options: ReencryptOptions,
    ) -> PrivageResult<ReencryptReport> {
        let mut candidates: Vec<Header> = self
            .entries(identity)?
            .into_iter()
            .map(|e| e.header)
            .filter(|h| self.plain_file(&h.label).map(|p| p.is_file()).unwrap_or(false))
            .collect();
        candidates.sort_by(|a, b| (&a.category, &a.label).cmp(&(&b.category, &b.label)));
        candidates.dedup_by(|a, b| a.same_secret(b));

        let mut report = ReencryptReport {
            candidates,
            dry_run: !(options.force || options.clean),
            ..ReencryptReport::default()
        };
        if report.candidates.is_empty() || report.dry_run {
            return Ok(report);
        }

        for header in report.candidates.iter().filter(|h| h.category == CREDENTIAL_CATEGORY) {
            let source = self.plain_file(&header.label)?;
            let text = Zeroizing::new(fs::read(&source)?);
            Credential::parse(&text).map_err(|e| {
                PrivageError::Validation(format!("{}: {e}", source.display()))
            })?;
        }

        for header in &report.candidates {
            let source = self.plain_file(&header.label)?;
            let file = File::open(&source)?;
            let fresh = Header::new(header.category.clone(), header.label.clone());
            let path = encrypt_save(&self.root, &fresh, "", file, identity)?;
            tracing::info!(label = %header.label, path = %path.display(), "secret re-encrypted");
            report.written.push(path);

            if options.clean {
                fs::remove_file(&source)?;
                report.removed.push(source);
            }
        }
        Ok(report)
    }

    // ── reading ops ──────────────────────────────────────────────────────

    /// Headers sorted by (category, label), optionally split by a filter
    /// matched against category, then label.
    pub fn list(&self, identity: &Identity, filter: Option<&str>) -> PrivageResult<Listing> {
        let mut headers: Vec<Header> = self
            .entries(identity)?
            .into_iter()
            .map(|e| e.header)
            .collect();
        headers.sort_by(|a, b| (&a.category, &a.label).cmp(&(&b.category, &b.label)));

        let Some(filter) = filter else {
            return Ok(Listing {
                filter: None,
                by_category: headers,
                by_label: Vec::new(),
            });
        };

        let mut listing = Listing {
            filter: Some(filter.to_string()),
            ..Listing::default()
        };
        for header in headers {
            if header.category.contains(filter) {
                listing.by_category.push(header);
            } else if header.label.contains(filter) {
                listing.by_label.push(header);
            }
        }
        Ok(listing)
    }

    /// Copy the decrypted body of `label` to `out`. Returns bytes written.
    pub fn cat(&self, identity: &Identity, label: &str, out: &mut dyn Write) -> PrivageResult<u64> {
        let entry = self.require(identity, label)?;
        let mut body = self.open_body(identity, &entry)?;
        io::copy(&mut body, out).map_err(body_error)
    }

    /// Decode the credential stored under `label`.
    pub fn credential(&self, identity: &Identity, label: &str) -> PrivageResult<Credential> {
        let entry = self.require(identity, label)?;
        if entry.header.category != CREDENTIAL_CATEGORY {
            return Err(PrivageError::Validation(format!(
                "{label} is not a credential (category {}), use cat",
                entry.header.category
            )));
        }
        let mut body = self.open_body(identity, &entry)?;
        let mut text = Zeroizing::new(Vec::new());
        body.read_to_end(&mut text).map_err(body_error)?;
        Credential::parse(&text)
    }

    /// Print a credential, or just one of its fields.
    pub fn show(
        &self,
        identity: &Identity,
        label: &str,
        field: Option<&str>,
        out: &mut dyn Write,
    ) -> PrivageResult<()> {
        let credential = self.credential(identity, label)?;
        match field {
            Some(name) => {
                let value = credential
                    .field(name)
                    .ok_or_else(|| PrivageError::NotFound(format!("field {name} in {label}")))?;
                writeln!(out, "{}", Zeroizing::new(value).as_str())?;
            }
            None => credential.render(out)?,
        }
        Ok(())
    }

    /// Put the password of credential `label` on the clipboard.
    pub fn clipboard(
        &self,
        identity: &Identity,
        label: &str,
        clipboard: &mut dyn Clipboard,
    ) -> PrivageResult<()> {
        let credential = self.credential(identity, label)?;
        let password = credential
            .field("password")
            .ok_or_else(|| PrivageError::NotFound(format!("password in {label}")))?;
        clipboard.copy(Zeroizing::new(password).as_str())
    }

    /// Plaintext file named `label` directly inside the repository.
    fn plain_file(&self, label: &str) -> PrivageResult<PathBuf> {
        let mut components = Path::new(label).components();
        match (components.next(), components.next()) {
            (Some(std::path::Component::Normal(name)), None) => Ok(self.root.join(name)),
            _ => Err(PrivageError::Validation(format!(
                "label {label:?} is not a plain file name"
            ))),
        }
    }
}

impl Listing {
    /// Text form printed by `privage list`.
    pub fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        let Some(filter) = &self.filter else {
            for header in &self.by_category {
                write_line(out, header)?;
            }
            return Ok(());
        };

        if self.by_category.is_empty() && self.by_label.is_empty() {
            writeln!(out, "no files matching '{filter}'")?;
            return Ok(());
        }
        if !self.by_category.is_empty() {
            writeln!(
                out,
                "{} files with category matching '{filter}'",
                self.by_category.len()
            )?;
            for header in &self.by_category {
                write_line(out, header)?;
            }
        }
        if !self.by_label.is_empty() {
            if !self.by_category.is_empty() {
                writeln!(out)?;
            }
            writeln!(out, "{} files with name matching '{filter}'", self.by_label.len())?;
            for header in &self.by_label {
                write_line(out, header)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_category.len() + self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn write_line(out: &mut dyn Write, header: &Header) -> io::Result<()> {
    writeln!(out, "  {:<20} {}", header.category, header.label)
}

/// Decrypting reader over the body of the file at `path`.
pub(crate) fn open_body(path: &Path, key: &x25519::Identity) -> PrivageResult<StreamReader<File>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(BLOCK_LEN as u64))?;
    crate::age::decrypting_reader(key, file)
}

/// Keep decryptable entries, log the rest.
pub(crate) fn readable(item: ScanItem) -> Option<Entry> {
    match item {
        Ok(entry) => Some(entry),
        Err(failure) if failure.error.is_no_matching_identity() => {
            tracing::debug!(path = %failure.path.display(), "not encrypted to this identity");
            None
        }
        Err(failure) => {
            tracing::warn!(path = %failure.path.display(), error = %failure.error, "skipping unreadable file");
            None
        }
    }
}

fn body_error(e: io::Error) -> PrivageError {
    PrivageError::Decrypt(format!("decrypting body: {e}"))
}

/// Distinct (category, label) pairs among `entries`.
pub(crate) fn secrets(entries: &[Entry]) -> BTreeSet<(String, String)> {
    entries
        .iter()
        .map(|e| (e.header.category.clone(), e.header.label.clone()))
        .collect()
}
