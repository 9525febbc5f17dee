//! Amend history mode: a single rewritten tx file and collapsed parentage.

mod fixtures;

use ledgerdb::core::{stream_path, Cancel, TxOp};
use ledgerdb::git::{Odb, StreamStore, MAIN_REF};

#[test]
fn writes_collapse_into_compact_tx() {
    let repo = fixtures::amend_repo();
    let cancel = Cancel::new();

    repo.docs
        .put(&repo.path, "users", "u1", br#"{"v":1}"#, &cancel)
        .unwrap();
    repo.docs
        .patch(
            &repo.path,
            "users",
            "u1",
            br#"[{"op":"replace","path":"/v","value":2}]"#,
            &cancel,
        )
        .unwrap();

    let got = repo.docs.get(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(got.payload, br#"{"v":2}"#);
    // Amend-mode patches are persisted as merge snapshots.
    assert_eq!(got.op, TxOp::Merge);

    // History never grows: one root tx, no parent links.
    let log = repo.docs.log(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].parent_hash, "");

    let store = StreamStore::new(repo.history_mode);
    let stream = stream_path(repo.layout, "users", "u1");
    let blobs = store.load_stream_txs(&repo.path, &stream, &cancel).unwrap();
    assert_eq!(blobs.len(), 1);
    assert!(blobs[0].path.ends_with("txs/compact.tx"));
}

#[test]
fn commit_parentage_is_replaced() {
    let repo = fixtures::amend_repo();
    let cancel = Cancel::new();

    repo.docs
        .put(&repo.path, "users", "u1", br#"{"v":1}"#, &cancel)
        .unwrap();
    repo.docs
        .put(&repo.path, "users", "u1", br#"{"v":2}"#, &cancel)
        .unwrap();

    // Main always points at a parentless commit.
    let odb = Odb::open(&repo.path).unwrap();
    let head = odb.get_ref(MAIN_REF).unwrap().unwrap();
    let repo2 = git2::Repository::open(&repo.path).unwrap();
    let commit = repo2.find_commit(head).unwrap();
    assert_eq!(commit.parent_count(), 0);
}

#[test]
fn concurrent_amend_writers_converge() {
    let repo = fixtures::amend_repo();
    let cancel = Cancel::new();

    repo.docs
        .put(&repo.path, "users", "u1", br#"{"v":1}"#, &cancel)
        .unwrap();
    // A second write against the same stream has no parent check to lose;
    // the CAS loop absorbs the ref race.
    repo.docs
        .put(&repo.path, "users", "u1", br#"{"v":2}"#, &cancel)
        .unwrap();

    let got = repo.docs.get(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(got.payload, br#"{"v":2}"#);
}
