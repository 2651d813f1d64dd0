//! Integration tests for crash safety and corruption recovery.
//!
//! These tests exercise the store through its public API only, manipulating the
//! files on disk between calls to simulate torn writes and bit rot.

use std::fs;

use config_store::{ConfigStore, LoadOrigin, PersistedDocument};
use rstest::rstest;
use serde_json::{json, Value};
use tempfile::TempDir;

fn defaults() -> Value {
    json!({ "routing": { "mode": "direct", "equalizer_enabled": false }, "active_source": null })
}

fn open(dir: &TempDir) -> ConfigStore {
    ConfigStore::new(dir.path().join("config.json"), 3, defaults())
}

fn corrupt_checksum(store: &ConfigStore) {
    let raw = fs::read_to_string(store.path()).unwrap();
    let mut document: Value = serde_json::from_str(&raw).unwrap();
    document["checksum"] = json!("0".repeat(64));
    fs::write(store.path(), serde_json::to_vec(&document).unwrap()).unwrap();
}

#[test]
fn test_save_then_load_is_identical() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.load();

    let data = json!({
        "routing": { "mode": "synchronized", "equalizer_enabled": true },
        "active_source": "radio",
        "display": { "brightness": 0.75, "locale": "de" }
    });
    store.save(data.clone()).unwrap();

    let reopened = open(&dir);
    let report = reopened.load();
    assert_eq!(report.origin, LoadOrigin::Live);
    assert!(report.warnings.is_empty());
    assert_eq!(*reopened.snapshot(), data);
}

#[test]
fn test_corrupted_checksum_recovers_newest_backup() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.load();
    store.save(json!({ "generation": 1 })).unwrap();
    store.save(json!({ "generation": 2 })).unwrap();
    corrupt_checksum(&store);

    let reopened = open(&dir);
    let report = reopened.load();

    assert_eq!(report.origin, LoadOrigin::Backup { index: 1 });
    assert!(report.recovered());
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("Checksum mismatch"));
    assert_eq!(*reopened.snapshot(), json!({ "generation": 1 }));
}

#[test]
fn test_backup_recovery_rewrites_live_document() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.load();
    store.save(json!({ "generation": 1 })).unwrap();
    store.save(json!({ "generation": 2 })).unwrap();
    corrupt_checksum(&store);

    open(&dir).load();

    let raw = fs::read(store.path()).unwrap();
    let live = PersistedDocument::from_slice(&raw, store.path()).unwrap();
    assert_eq!(live.data, json!({ "generation": 1 }));

    let report = open(&dir).load();
    assert_eq!(report.origin, LoadOrigin::Live);
    assert!(report.warnings.is_empty());
}

#[test]
fn test_recovery_walks_past_bad_backups() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.load();
    for generation in 1..=3 {
        store.save(json!({ "generation": generation })).unwrap();
    }
    corrupt_checksum(&store);
    fs::write(store.backup_path(1), b"{ not json").unwrap();

    let reopened = open(&dir);
    let report = reopened.load();

    assert_eq!(report.origin, LoadOrigin::Backup { index: 2 });
    assert_eq!(report.warnings.len(), 2);
    assert_eq!(*reopened.snapshot(), json!({ "generation": 1 }));
}

#[test]
fn test_everything_corrupt_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.load();
    store.save(json!({ "generation": 1 })).unwrap();
    corrupt_checksum(&store);
    fs::write(store.backup_path(1), b"").unwrap();

    let reopened = open(&dir);
    let report = reopened.load();

    assert_eq!(report.origin, LoadOrigin::Defaults);
    assert!(report.recovered());
    assert_eq!(*reopened.snapshot(), defaults());
}

#[rstest]
#[case::empty_temp(b"".as_slice())]
#[case::torn_temp(b"{\"data\": {\"routing\": {\"mo".as_slice())]
#[case::complete_temp(b"{\"data\": {}, \"checksum\": \"44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a\"}".as_slice())]
fn test_crash_between_temp_write_and_rename(#[case] temp_contents: &[u8]) {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.load();
    store.save(json!({ "generation": 1 })).unwrap();

    // The process died after writing the temp file but before the rename.
    fs::write(dir.path().join("config.json.tmp"), temp_contents).unwrap();

    let reopened = open(&dir);
    let report = reopened.load();
    assert_eq!(report.origin, LoadOrigin::Live);
    assert_eq!(*reopened.snapshot(), json!({ "generation": 1 }));

    // The next save simply overwrites the stray temp file.
    reopened.save(json!({ "generation": 2 })).unwrap();
    let raw = fs::read(reopened.path()).unwrap();
    let document = PersistedDocument::from_slice(&raw, reopened.path()).unwrap();
    assert_eq!(document.data, json!({ "generation": 2 }));
}

#[test]
fn test_corrupt_live_is_not_rotated_into_backups() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.load();
    store.save(json!({ "generation": 1 })).unwrap();
    corrupt_checksum(&store);

    let reopened = open(&dir);
    reopened.load();
    reopened.save(json!({ "generation": 2 })).unwrap();

    // bak.1 still holds the defaults written before generation 1, not the corrupt file.
    let raw = fs::read(reopened.backup_path(1)).unwrap();
    let backup = PersistedDocument::from_slice(&raw, &reopened.backup_path(1)).unwrap();
    assert_eq!(backup.data, defaults());
}

#[test]
fn test_missing_live_with_backup_is_a_recovery() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.load();
    store.save(json!({ "generation": 1 })).unwrap();
    fs::remove_file(store.path()).unwrap();

    let reopened = open(&dir);
    let report = reopened.load();
    assert_eq!(report.origin, LoadOrigin::Backup { index: 1 });
    assert_eq!(*reopened.snapshot(), defaults());
}
