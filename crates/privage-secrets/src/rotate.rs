//! Identity rotation
//!
//! Rotation flow:
//!   1. Prepare: refuse an empty repository, create the rotation key
//!      `<identity>.rotate` unless it already exists, load it.
//!   2. Re-encrypt: every file readable by the current key K is copied,
//!      re-encrypted to the rotation key K', under `<hash>.rotate.age`.
//!   3. Clean (separate run with `clean`): delete the K files, strip the
//!      `.rotate` suffix from the K' files, back the current identity file
//!      up as `<identity>-<RFC3339>.bak` and move the rotation key into
//!      its place.
//!
//! Every step may be repeated. Files already rotated show up as "no
//! matching identity" under K and are skipped; clean checks that every
//! secret readable by K has a K' copy before deleting anything, and each of
//! its renames is atomic, so an interrupted clean finishes on the next run.

use privage_core::{PrivageError, PrivageResult, Slot};
use privage_crypto::names;
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::identity::{self, Identity, IdentityKind};
use crate::repo::{self, Repository};
use crate::save::encrypt_save;
use crate::scan;
use crate::token::Token;

#[derive(Debug, Clone, Copy, Default)]
pub struct RotateOptions {
    /// Run the clean phase instead of re-encrypting
    pub clean: bool,
    /// Wrap a newly created rotation key with this token slot
    pub slot: Option<Slot>,
}

/// Outcome of a rotation run.
#[derive(Debug, Clone, Default)]
pub struct RotateReport {
    pub rotation_key: PathBuf,
    /// The rotation key was generated by this run
    pub created_key: bool,
    /// `.rotate` files written by this run
    pub rewritten: Vec<PathBuf>,
    /// Files whose `.rotate` copy already existed
    pub already_rotated: usize,
    /// K files deleted by clean
    pub removed: Vec<PathBuf>,
    /// `.rotate` files renamed into place by clean
    pub renamed: Vec<PathBuf>,
    /// Where clean moved the previous identity file
    pub backup: Option<PathBuf>,
}

/// Path of the rotation key for `identity_path`.
pub fn rotation_key_path(identity_path: &Path) -> PathBuf {
    let mut name: OsString = identity_path.as_os_str().to_owned();
    name.push(names::ROTATE_SUFFIX);
    PathBuf::from(name)
}

/// Path the identity file is moved to by clean.
pub fn backup_path(identity_path: &Path, at: chrono::DateTime<chrono::Utc>) -> PathBuf {
    let stamp = at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let mut name: OsString = identity_path.as_os_str().to_owned();
    name.push(format!("-{stamp}.bak"));
    PathBuf::from(name)
}

/// Run one rotation step: re-encrypt (phase 1 and 2) or clean (phase 3).
pub fn rotate(
    repo: &Repository,
    identity: &Identity,
    token: &mut dyn Token,
    options: RotateOptions,
) -> PrivageResult<RotateReport> {
    if options.clean {
        clean(repo, identity, token, options)
    } else {
        reencrypt(repo, identity, token, options)
    }
}

// ── phase 1 + 2 ──────────────────────────────────────────────────────────

fn reencrypt(
    repo: &Repository,
    identity: &Identity,
    token: &mut dyn Token,
    options: RotateOptions,
) -> PrivageResult<RotateReport> {
    let key = identity.key()?;
    let total = repo.count(identity)?;
    if total == 0 {
        return Err(PrivageError::Rotation(
            "no files in the repository are readable by the current identity".into(),
        ));
    }

    let rotation_key = rotation_key_path(identity.path());
    let mut report = RotateReport {
        rotation_key: rotation_key.clone(),
        ..RotateReport::default()
    };
    if !rotation_key.exists() {
        identity::create_file(&rotation_key, token, options.slot)?;
        report.created_key = true;
    }
    let next = load_rotation_key(&rotation_key, identity, token, options.slot)?;
    let next_key = next.key()?;
    let next_recipient = next_key.to_public().to_string();

    for item in repo.scan(identity)? {
        let entry = match item {
            Ok(entry) => entry,
            Err(failure) if failure.error.is_no_matching_identity() => continue,
            Err(failure) => {
                return Err(PrivageError::Rotation(format!("cannot rotate {failure}")));
            }
        };

        let target = repo.root().join(names::file_name(
            &entry.header.category,
            &entry.header.label,
            &next_recipient,
            names::ROTATE_SUFFIX,
        ));
        if target.exists() {
            if let Ok(existing) = scan::read_header(&target, next_key) {
                if existing.same_secret(&entry.header) {
                    report.already_rotated += 1;
                    continue;
                }
            }
        }

        let body = repo::open_body(&entry.path, key)?;
        let path = encrypt_save(repo.root(), &entry.header, names::ROTATE_SUFFIX, body, &next)?;
        tracing::info!(label = %entry.header.label, path = %path.display(), "file rotated");
        report.rewritten.push(path);
    }

    tracing::info!(
        total,
        rewritten = report.rewritten.len(),
        already_rotated = report.already_rotated,
        "rotation re-encrypt complete"
    );
    Ok(report)
}

// ── phase 3 ──────────────────────────────────────────────────────────────

fn clean(
    repo: &Repository,
    identity: &Identity,
    token: &mut dyn Token,
    options: RotateOptions,
) -> PrivageResult<RotateReport> {
    let identity_path = identity.path().to_path_buf();
    let rotation_key = rotation_key_path(&identity_path);
    if !rotation_key.exists() {
        return Err(PrivageError::Rotation(format!(
            "no rotation in progress ({} not found)",
            rotation_key.display()
        )));
    }
    let next = load_rotation_key(&rotation_key, identity, token, options.slot)?;
    next.key()?;

    // A missing identity file means a previous clean got as far as the
    // backup; only the final rename is left.
    let old = if identity_path.exists() {
        repo.entries(identity)?
    } else {
        Vec::new()
    };
    let new = repo.entries(&next)?;

    let rotated = repo::secrets(&new);
    let missing: Vec<String> = repo::secrets(&old)
        .into_iter()
        .filter(|secret| !rotated.contains(secret))
        .map(|(category, label)| format!("{category}/{label}"))
        .collect();
    if !missing.is_empty() {
        return Err(PrivageError::Rotation(format!(
            "{} of {} files have no rotated copy, run rotate first: {}",
            missing.len(),
            old.len(),
            missing.join(", ")
        )));
    }

    let mut report = RotateReport {
        rotation_key: rotation_key.clone(),
        ..RotateReport::default()
    };

    for entry in old {
        fs::remove_file(&entry.path)?;
        tracing::info!(path = %entry.path.display(), "removed file of previous identity");
        report.removed.push(entry.path);
    }

    for entry in new {
        let Some(name) = entry.path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stripped) = names::strip_rotate_suffix(name) else {
            continue;
        };
        let target = entry.path.with_file_name(stripped);
        fs::rename(&entry.path, &target)?;
        report.renamed.push(target);
    }

    if identity_path.exists() {
        let backup = backup_path(&identity_path, chrono::Utc::now());
        fs::rename(&identity_path, &backup)?;
        tracing::info!(backup = %backup.display(), "previous identity backed up");
        report.backup = Some(backup);
    }
    fs::rename(&rotation_key, &identity_path)?;

    tracing::info!(
        removed = report.removed.len(),
        renamed = report.renamed.len(),
        identity = %identity_path.display(),
        "rotation complete"
    );
    Ok(report)
}

/// Load the rotation key, raw or token-wrapped. A token-wrapped key uses
/// the given slot, falling back to the current identity's slot.
fn load_rotation_key(
    path: &Path,
    current: &Identity,
    token: &mut dyn Token,
    slot: Option<Slot>,
) -> PrivageResult<Identity> {
    let slot = slot.or(match current.kind() {
        IdentityKind::Token(slot) => Some(slot),
        IdentityKind::Raw => None,
    });
    let file = File::open(path).map_err(|e| {
        PrivageError::Rotation(format!("opening rotation key {}: {e}", path.display()))
    })?;
    let next = Identity::load_auto(file, path, token, slot);
    if let Some(e) = next.error() {
        return Err(PrivageError::Rotation(format!(
            "loading rotation key {}: {e}",
            path.display()
        )));
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::testing::SoftToken;
    use crate::token::DisabledToken;
    use privage_crypto::header::Header;

    fn setup(files: &[&str]) -> (tempfile::TempDir, Repository, Identity) {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("privage-key.txt");
        identity::create_file(&key_path, &mut DisabledToken, None).unwrap();
        let id = Identity::load_raw(File::open(&key_path).unwrap(), &key_path);
        let repo = Repository::new(dir.path());
        for label in files {
            encrypt_save(dir.path(), &Header::new("docs", *label), "", label.as_bytes(), &id).unwrap();
        }
        (dir, repo, id)
    }

    #[test]
    fn test_paths() {
        let key = Path::new("/home/u/privage-key.txt");
        assert_eq!(rotation_key_path(key), PathBuf::from("/home/u/privage-key.txt.rotate"));

        let at = chrono::DateTime::parse_from_rfc3339("2024-05-01T10:20:30Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(
            backup_path(key, at),
            PathBuf::from("/home/u/privage-key.txt-2024-05-01T10:20:30Z.bak")
        );
    }

    #[test]
    fn test_empty_repository_rejected() {
        let (dir, repo, id) = setup(&[]);
        let err = rotate(&repo, &id, &mut DisabledToken, RotateOptions::default()).unwrap_err();

        assert!(matches!(err, PrivageError::Rotation(_)));
        assert!(!rotation_key_path(&dir.path().join("privage-key.txt")).exists());
    }

    #[test]
    fn test_rerun_skips_finished_files() {
        let (_dir, repo, id) = setup(&["a", "b"]);

        let first = rotate(&repo, &id, &mut DisabledToken, RotateOptions::default()).unwrap();
        assert!(first.created_key);
        assert_eq!(first.rewritten.len(), 2);

        let second = rotate(&repo, &id, &mut DisabledToken, RotateOptions::default()).unwrap();
        assert!(!second.created_key);
        assert!(second.rewritten.is_empty());
        assert_eq!(second.already_rotated, 2);
    }

    #[test]
    fn test_clean_without_rotation_key() {
        let (_dir, repo, id) = setup(&["a"]);
        let options = RotateOptions { clean: true, slot: None };
        let err = rotate(&repo, &id, &mut DisabledToken, options).unwrap_err();
        assert!(err.to_string().contains("no rotation in progress"));
    }

    #[test]
    fn test_clean_before_reencrypt_finished() {
        let (dir, repo, id) = setup(&["a"]);
        rotate(&repo, &id, &mut DisabledToken, RotateOptions::default()).unwrap();

        // a file added after the re-encrypt pass has no rotated copy
        encrypt_save(dir.path(), &Header::new("docs", "late"), "", &b"x"[..], &id).unwrap();

        let options = RotateOptions { clean: true, slot: None };
        let err = rotate(&repo, &id, &mut DisabledToken, options).unwrap_err();
        assert!(err.to_string().contains("docs/late"), "{err}");
        assert_eq!(repo.count(&id).unwrap(), 2);
    }

    #[test]
    fn test_token_wrapped_rotation_key() {
        let slot = Slot(0x9a);
        let (dir, repo, id) = setup(&["a"]);
        let mut token = SoftToken::with_slot(slot);

        let options = RotateOptions { clean: false, slot: Some(slot) };
        let report = rotate(&repo, &id, &mut token, options).unwrap();

        let stored = fs::read_to_string(&report.rotation_key).unwrap();
        assert!(!stored.contains("AGE-SECRET-KEY-1"));
        assert_eq!(report.rewritten.len(), 1);
        assert!(dir.path().join(report.rewritten[0].file_name().unwrap()).exists());
    }
}
