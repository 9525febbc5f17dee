//! Verifier scenarios, including a hand-seeded orphan tx.

mod fixtures;

use ledgerdb::core::{encode, stream_path, sum_hex, Cancel, Transaction, TxOp};
use ledgerdb::git::{Odb, MAIN_REF};
use ledgerdb::integrity::{VerifyOptions, VerifyService};

fn verify_service(repo: &fixtures::TestRepo) -> VerifyService {
    VerifyService::new(
        repo.caps.clone(),
        ledgerdb::git::StreamStore::new(repo.history_mode),
    )
}

#[test]
fn healthy_streams_verify_clean() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    repo.docs
        .put(&repo.path, "users", "u1", br#"{"a":1}"#, &cancel)
        .unwrap();
    repo.docs
        .patch(
            &repo.path,
            "users",
            "u1",
            br#"[{"op":"add","path":"/b","value":2}]"#,
            &cancel,
        )
        .unwrap();
    repo.docs
        .put(&repo.path, "orders", "o1", br#"{"total":10}"#, &cancel)
        .unwrap();

    let report = verify_service(&repo)
        .verify(&repo.path, VerifyOptions { deep: true }, &cancel)
        .unwrap();
    assert_eq!(report.streams, 2);
    assert_eq!(report.valid, 2);
    assert!(report.issues.is_empty());
}

#[test]
fn deleted_doc_verifies_clean_in_deep_mode() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    repo.docs
        .put(&repo.path, "users", "u1", br#"{"a":1}"#, &cancel)
        .unwrap();
    repo.docs.delete(&repo.path, "users", "u1", &cancel).unwrap();

    let report = verify_service(&repo)
        .verify(&repo.path, VerifyOptions { deep: true }, &cancel)
        .unwrap();
    assert_eq!(report.valid, 1);
    assert!(report.issues.is_empty());
}

#[test]
fn orphan_tx_is_reported_once() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    // Two reachable txs...
    repo.docs
        .put(&repo.path, "users", "u1", br#"{"a":1}"#, &cancel)
        .unwrap();
    repo.docs
        .patch(
            &repo.path,
            "users",
            "u1",
            br#"[{"op":"replace","path":"/a","value":2}]"#,
            &cancel,
        )
        .unwrap();

    // ...plus one blob HEAD's parent walk never visits: a second root.
    let orphan = Transaction {
        tx_id: repo.caps.ids.new_id().unwrap(),
        timestamp: repo.caps.clock.now_nanos(),
        collection: "users".to_string(),
        doc_id: "u1".to_string(),
        op: TxOp::Put,
        parent_hash: String::new(),
        schema_version: String::new(),
        snapshot: Some(br#"{"orphaned":true}"#.to_vec()),
        patch: None,
    };
    let orphan_bytes = encode(&orphan).unwrap();
    seed_tx_blob(
        &repo.path,
        &stream_path(repo.layout, "users", "u1"),
        &format!("{}_put.tx", orphan.timestamp),
        &orphan_bytes,
    );

    let report = verify_service(&repo)
        .verify(&repo.path, VerifyOptions { deep: false }, &cancel)
        .unwrap();
    assert_eq!(report.streams, 1);
    assert_eq!(report.valid, 0);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].code, "orphan_tx");
    assert!(report.issues[0].message.contains("1 orphan"));
}

#[test]
fn broken_parent_link_is_chain_invalid() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    // A head whose parent hash references a tx that is not in the stream.
    let head = Transaction {
        tx_id: repo.caps.ids.new_id().unwrap(),
        timestamp: repo.caps.clock.now_nanos(),
        collection: "users".to_string(),
        doc_id: "u9".to_string(),
        op: TxOp::Put,
        parent_hash: sum_hex(b"never committed"),
        schema_version: String::new(),
        snapshot: Some(br#"{"a":1}"#.to_vec()),
        patch: None,
    };
    let head_bytes = encode(&head).unwrap();
    let stream = stream_path(repo.layout, "users", "u9");
    let file = format!("{}_put.tx", head.timestamp);
    seed_tx_blob(&repo.path, &stream, &file, &head_bytes);
    seed_head_pointer(&repo.path, &stream, &format!("txs/{file}"));

    let report = verify_service(&repo)
        .verify(&repo.path, VerifyOptions { deep: false }, &cancel)
        .unwrap();
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].code, "chain_invalid");
}

#[test]
fn garbage_blob_is_tx_decode() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    repo.docs
        .put(&repo.path, "users", "u1", br#"{"a":1}"#, &cancel)
        .unwrap();
    seed_tx_blob(
        &repo.path,
        &stream_path(repo.layout, "users", "u1"),
        "999_put.tx",
        b"this is not a tx",
    );

    let report = verify_service(&repo)
        .verify(&repo.path, VerifyOptions { deep: false }, &cancel)
        .unwrap();
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].code, "tx_decode");
}

/// Commit one extra blob under `<stream>/txs/<file>` without touching HEAD.
fn seed_tx_blob(repo_path: &std::path::Path, stream: &str, file: &str, bytes: &[u8]) {
    seed_file(repo_path, &format!("{stream}/txs/{file}"), bytes);
}

/// Point `<stream>/HEAD` at a relative tx path.
fn seed_head_pointer(repo_path: &std::path::Path, stream: &str, rel: &str) {
    seed_file(repo_path, &format!("{stream}/HEAD"), format!("{rel}\n").as_bytes());
}

fn seed_file(repo_path: &std::path::Path, path: &str, bytes: &[u8]) {
    let odb = Odb::open(repo_path).unwrap();
    let base = odb.ref_tree(MAIN_REF).unwrap();
    let parent = base.as_ref().map(|(commit, _)| *commit);
    let base_tree = base.as_ref().map(|(_, tree)| tree.id());

    let blob = odb.put_blob(bytes).unwrap();
    let root = odb.upsert_path(base_tree, path, blob).unwrap();
    let commit = odb.put_commit(root, parent, "seed fixture").unwrap();
    odb.check_and_set_ref(MAIN_REF, parent, commit).unwrap();
}
