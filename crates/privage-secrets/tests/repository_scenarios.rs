//! End-to-end repository scenarios: add, show, list, decrypt, reencrypt.

mod common;

use common::Fixture;
use privage_core::PrivageError;
use privage_crypto::header::Header;
use privage_crypto::names;
use privage_secrets::{ReencryptOptions, ScanError};
use std::fs;

#[test]
fn add_and_show_credential() {
    let fx = Fixture::new();
    let id = fx.identity();

    let report = fx.repo.add(&id, "credential", "gmail").unwrap();

    let recipient = id.recipient().unwrap().to_string();
    assert_eq!(
        fx.age_files(),
        vec![names::file_name("credential", "gmail", &recipient, "")]
    );
    assert_eq!(report.header, Header::new("credential", "gmail"));

    let credential = fx.repo.credential(&id, "gmail").unwrap();
    assert_eq!(credential.password.chars().count(), 25);

    let mut out = Vec::new();
    fx.repo.show(&id, "gmail", None, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("👤 jdoe"), "{text}");
    assert!(text.contains(&format!("🔑 {}", credential.password)), "{text}");
}

#[test]
fn label_must_be_unique() {
    let fx = Fixture::new();
    let id = fx.identity();
    fx.repo.add(&id, "credential", "gmail").unwrap();

    let err = fx.repo.add(&id, "credential", "gmail").unwrap_err();
    assert!(matches!(err, PrivageError::LabelExists(_)));
    assert!(err.to_string().contains("label already exists"));
    assert_eq!(fx.age_files().len(), 1);

    // uniqueness is on the label alone
    fx.write_plain("gmail", b"x");
    assert!(matches!(
        fx.repo.add(&id, "other", "gmail"),
        Err(PrivageError::LabelExists(_))
    ));
}

#[test]
fn custom_category_file() {
    let fx = Fixture::new();
    let id = fx.identity();
    fx.write_plain("report.pdf", b"%PDF-1.7 quarterly numbers");

    fx.repo.add(&id, "work", "report.pdf").unwrap();

    let recipient = id.recipient().unwrap().to_string();
    let expected = fx.path().join(names::file_name("work", "report.pdf", &recipient, ""));
    assert!(expected.exists());

    let entries = fx.repo.entries(&id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].header.category, "work");
    assert_eq!(entries[0].header.label, "report.pdf");
    assert_eq!(entries[0].path, expected);

    let mut out = Vec::new();
    fx.repo.cat(&id, "report.pdf", &mut out).unwrap();
    assert_eq!(out, b"%PDF-1.7 quarterly numbers");
}

#[test]
fn reencrypt_dry_run_then_force_then_clean() {
    let fx = Fixture::new();
    let id = fx.identity();
    let plain = fx.write_plain("report.pdf", b"v1");
    let added = fx.repo.add(&id, "work", "report.pdf").unwrap();
    fs::remove_file(&plain).unwrap();

    // decrypt recreates the plaintext next to the encrypted files
    assert_eq!(fx.repo.decrypt(&id, "report.pdf").unwrap(), plain);
    assert_eq!(fs::read(&plain).unwrap(), b"v1");
    fs::write(&plain, b"v2").unwrap();

    let before = fs::read(&added.path).unwrap();
    let dry = fx.repo.reencrypt(&id, ReencryptOptions::default()).unwrap();
    assert!(dry.dry_run);
    assert_eq!(dry.candidates, vec![Header::new("work", "report.pdf")]);
    assert!(dry.written.is_empty());
    assert_eq!(fs::read(&added.path).unwrap(), before);

    let forced = fx
        .repo
        .reencrypt(&id, ReencryptOptions { force: true, clean: false })
        .unwrap();
    assert_eq!(forced.written, vec![added.path.clone()]);
    assert!(plain.exists());
    let mut out = Vec::new();
    fx.repo.cat(&id, "report.pdf", &mut out).unwrap();
    assert_eq!(out, b"v2");

    let cleaned = fx
        .repo
        .reencrypt(&id, ReencryptOptions { force: true, clean: true })
        .unwrap();
    assert_eq!(cleaned.removed, vec![plain.clone()]);
    assert!(!plain.exists());
    assert_eq!(fx.age_files().len(), 1);
}

#[test]
fn reencrypt_without_candidates() {
    let fx = Fixture::new();
    let id = fx.identity();
    fx.repo.add(&id, "credential", "gmail").unwrap();

    let report = fx
        .repo
        .reencrypt(&id, ReencryptOptions { force: true, clean: true })
        .unwrap();
    assert!(report.candidates.is_empty());
    assert!(report.written.is_empty());
}

#[test]
fn list_with_filter() {
    let fx = Fixture::new();
    let id = fx.identity();
    for (category, label) in [
        ("finance", "invoice.pdf"),
        ("finance", "salary.xls"),
        ("personal", "todo.txt"),
    ] {
        fx.write_plain(label, label.as_bytes());
        fx.repo.add(&id, category, label).unwrap();
    }

    let listing = fx.repo.list(&id, Some("finance")).unwrap();
    let mut out = Vec::new();
    listing.render(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("2 files with category matching 'finance'"), "{text}");
    assert!(text.contains("invoice.pdf"));
    assert!(text.contains("salary.xls"));
    assert!(!text.contains("todo.txt"));

    let listing = fx.repo.list(&id, Some("todo")).unwrap();
    let mut out = Vec::new();
    listing.render(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("1 files with name matching 'todo'"), "{text}");
    assert!(!text.contains("category matching"));

    assert_eq!(fx.repo.list(&id, None).unwrap().len(), 3);
    assert!(fx.repo.list(&id, Some("nothing")).unwrap().is_empty());
}

#[test]
fn scan_survives_bad_files() {
    let fx = Fixture::new();
    let id = fx.identity();
    fx.repo.add(&id, "credential", "gmail").unwrap();

    fs::write(fx.path().join("short.age"), b"truncated").unwrap();
    let other = Fixture::new();
    let other_id = other.identity();
    let foreign = other.repo.add(&other_id, "credential", "theirs").unwrap();
    fs::copy(&foreign.path, fx.path().join(foreign.path.file_name().unwrap())).unwrap();

    let items: Vec<_> = fx.repo.scan(&id).unwrap().collect();
    assert_eq!(items.len(), 3);

    let mut readable = 0;
    let mut short = 0;
    let mut foreign_count = 0;
    for item in &items {
        match item {
            Ok(_) => readable += 1,
            Err(f) if matches!(f.error, ScanError::ShortHeader) => short += 1,
            Err(f) if f.error.is_no_matching_identity() => foreign_count += 1,
            Err(f) => panic!("unexpected failure {f}"),
        }
    }
    assert_eq!((readable, short, foreign_count), (1, 1, 1));

    // ops keep working around the bad files
    assert_eq!(fx.repo.count(&id).unwrap(), 1);
    assert!(fx.repo.credential(&id, "gmail").is_ok());
}

#[test]
fn delete_missing_label_is_a_notice() {
    let fx = Fixture::new();
    let id = fx.identity();
    assert_eq!(fx.repo.delete(&id, "nope").unwrap(), None);
}
