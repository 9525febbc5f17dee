//! Repository init and manifest behavior.

use ledgerdb::core::{Caps, HistoryMode, StreamLayout};
use ledgerdb::repo::{self, InitOptions};
use tempfile::TempDir;

#[test]
fn init_writes_manifest_with_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store");
    let caps = Caps::standard();

    let manifest = repo::init(&path, InitOptions::default(), caps.clock.as_ref()).unwrap();
    assert_eq!(manifest.name, "store");
    assert_eq!(manifest.stream_layout, StreamLayout::Sharded);
    assert_eq!(manifest.history_mode, HistoryMode::Append);
    assert!(manifest.created_at.is_some());

    assert!(path.join("db.yaml").exists());
    assert!(path.join("HEAD").exists());

    let loaded = repo::load_manifest(&path).unwrap();
    assert_eq!(loaded, manifest);
}

#[test]
fn init_honors_overrides() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store");
    let caps = Caps::standard();

    let manifest = repo::init(
        &path,
        InitOptions {
            name: Some("orders".to_string()),
            stream_layout: Some(StreamLayout::Flat),
            history_mode: Some(HistoryMode::Amend),
        },
        caps.clock.as_ref(),
    )
    .unwrap();
    assert_eq!(manifest.name, "orders");
    assert_eq!(manifest.stream_layout, StreamLayout::Flat);
    assert_eq!(manifest.history_mode, HistoryMode::Amend);
}

#[test]
fn init_refuses_existing_repository() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store");
    let caps = Caps::standard();

    repo::init(&path, InitOptions::default(), caps.clock.as_ref()).unwrap();
    assert!(repo::init(&path, InitOptions::default(), caps.clock.as_ref()).is_err());
}

#[test]
fn missing_manifest_defaults_to_legacy_flat() {
    let dir = TempDir::new().unwrap();
    let manifest = repo::load_manifest(dir.path()).unwrap();
    assert_eq!(manifest.version, 1);
    assert_eq!(manifest.stream_layout, StreamLayout::Flat);
    assert_eq!(manifest.history_mode, HistoryMode::Append);
}

#[test]
fn flat_layout_repo_round_trips_documents() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store");
    let caps = Caps::standard();
    repo::init(
        &path,
        InitOptions {
            name: None,
            stream_layout: Some(StreamLayout::Flat),
            history_mode: Some(HistoryMode::Append),
        },
        caps.clock.as_ref(),
    )
    .unwrap();

    // The service picks the flat layout up from the manifest.
    let docs = ledgerdb::Docs::for_repo(caps, &path).unwrap();
    let cancel = ledgerdb::core::Cancel::new();
    docs.put(&path, "users", "u1", br#"{"a":1}"#, &cancel).unwrap();
    let got = docs.get(&path, "users", "u1", &cancel).unwrap();
    assert_eq!(got.payload, br#"{"a":1}"#);
}
