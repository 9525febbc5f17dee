//! End-to-end document service scenarios against real temp repositories.

mod fixtures;

use ledgerdb::core::Cancel;
use ledgerdb::doc::{DocError, RevertTarget};
use ledgerdb::core::TxOp;

#[test]
fn put_get_roundtrip() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    let receipt = repo
        .docs
        .put(&repo.path, "users", "u1", br#"{"a":1}"#, &cancel)
        .unwrap();
    assert_eq!(receipt.tx_hash.len(), 64);
    assert!(!receipt.commit.is_empty());

    let got = repo.docs.get(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(got.payload, br#"{"a":1}"#);
    assert_eq!(got.op, TxOp::Put);
    assert_eq!(got.tx_hash, receipt.tx_hash);
    assert_eq!(got.tx_id, receipt.tx_id);
}

#[test]
fn put_canonicalizes_payload() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    repo.docs
        .put(&repo.path, "users", "u1", br#"{ "b": 2, "a": 1 }"#, &cancel)
        .unwrap();
    let got = repo.docs.get(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(got.payload, br#"{"a":1,"b":2}"#);
}

#[test]
fn patch_then_get() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    let first = repo
        .docs
        .put(&repo.path, "users", "u1", br#"{"a":1}"#, &cancel)
        .unwrap();
    let second = repo
        .docs
        .patch(
            &repo.path,
            "users",
            "u1",
            br#"[{"op":"replace","path":"/a","value":2}]"#,
            &cancel,
        )
        .unwrap();
    assert_ne!(first.tx_hash, second.tx_hash);

    let got = repo.docs.get(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(got.payload, br#"{"a":2}"#);
    assert_eq!(got.op, TxOp::Patch);
    assert_eq!(got.tx_hash, second.tx_hash);

    let log = repo.docs.log(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].tx_hash, second.tx_hash);
    assert_eq!(log[0].parent_hash, first.tx_hash);
    assert_eq!(log[1].tx_hash, first.tx_hash);
    assert_eq!(log[1].parent_hash, "");
}

#[test]
fn patch_missing_doc_fails() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();
    assert!(matches!(
        repo.docs
            .patch(&repo.path, "users", "ghost", br#"[]"#, &cancel),
        Err(DocError::DocNotFound)
    ));
}

#[test]
fn delete_then_get() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    repo.docs
        .put(&repo.path, "users", "u1", br#"{"a":1}"#, &cancel)
        .unwrap();
    repo.docs.delete(&repo.path, "users", "u1", &cancel).unwrap();

    assert!(matches!(
        repo.docs.get(&repo.path, "users", "u1", &cancel),
        Err(DocError::DocDeleted)
    ));

    let log = repo.docs.log(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].op, TxOp::Delete);

    // Deleting again is refused.
    assert!(matches!(
        repo.docs.delete(&repo.path, "users", "u1", &cancel),
        Err(DocError::DocDeleted)
    ));
}

#[test]
fn delete_missing_doc_fails() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();
    assert!(matches!(
        repo.docs.delete(&repo.path, "users", "ghost", &cancel),
        Err(DocError::DocNotFound)
    ));
}

#[test]
fn get_missing_doc_fails() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();
    assert!(matches!(
        repo.docs.get(&repo.path, "users", "ghost", &cancel),
        Err(DocError::DocNotFound)
    ));
}

#[test]
fn input_normalization_and_validation() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    assert!(matches!(
        repo.docs.put(&repo.path, "  ", "u1", b"{}", &cancel),
        Err(DocError::CollectionRequired)
    ));
    assert!(matches!(
        repo.docs.put(&repo.path, "a/b", "u1", b"{}", &cancel),
        Err(DocError::InvalidCollection { .. })
    ));
    assert!(matches!(
        repo.docs.put(&repo.path, "users", " ", b"{}", &cancel),
        Err(DocError::DocIdRequired)
    ));
    assert!(matches!(
        repo.docs.put(&repo.path, "users", "u1", b"", &cancel),
        Err(DocError::PayloadRequired)
    ));

    // Whitespace around identifiers is trimmed, not rejected.
    repo.docs
        .put(&repo.path, " users ", " u1 ", br#"{"a":1}"#, &cancel)
        .unwrap();
    let got = repo.docs.get(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(got.payload, br#"{"a":1}"#);
}

#[test]
fn revert_restores_prior_state_forward() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    let first = repo
        .docs
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
    repo.docs
        .patch(
            &repo.path,
            "users",
            "u1",
            br#"[{"op":"replace","path":"/v","value":3}]"#,
            &cancel,
        )
        .unwrap();

    let log_before = repo.docs.log(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(log_before.len(), 3);

    let target = RevertTarget {
        tx_id: Some(first.tx_id.clone()),
        tx_hash: None,
    };
    repo.docs
        .revert(&repo.path, "users", "u1", &target, &cancel)
        .unwrap();

    let got = repo.docs.get(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(got.payload, br#"{"v":1}"#);
    assert_eq!(got.op, TxOp::Put);

    // History grows; it is never rewritten.
    let log_after = repo.docs.log(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(log_after.len(), 4);
}

#[test]
fn revert_by_hash() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    let first = repo
        .docs
        .put(&repo.path, "users", "u1", br#"{"v":1}"#, &cancel)
        .unwrap();
    repo.docs
        .put(&repo.path, "users", "u1", br#"{"v":2}"#, &cancel)
        .unwrap();

    let target = RevertTarget {
        tx_id: None,
        tx_hash: Some(first.tx_hash.clone()),
    };
    repo.docs
        .revert(&repo.path, "users", "u1", &target, &cancel)
        .unwrap();
    let got = repo.docs.get(&repo.path, "users", "u1", &cancel).unwrap();
    assert_eq!(got.payload, br#"{"v":1}"#);
}

#[test]
fn revert_reference_validation() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();
    repo.docs
        .put(&repo.path, "users", "u1", br#"{"v":1}"#, &cancel)
        .unwrap();

    assert!(matches!(
        repo.docs
            .revert(&repo.path, "users", "u1", &RevertTarget::default(), &cancel),
        Err(DocError::TxReferenceRequired)
    ));
    assert!(matches!(
        repo.docs.revert(
            &repo.path,
            "users",
            "u1",
            &RevertTarget {
                tx_id: Some("x".to_string()),
                tx_hash: Some("y".to_string()),
            },
            &cancel,
        ),
        Err(DocError::TxReferenceAmbiguous)
    ));
    assert!(matches!(
        repo.docs.revert(
            &repo.path,
            "users",
            "u1",
            &RevertTarget {
                tx_id: Some("01NOPE".to_string()),
                tx_hash: None,
            },
            &cancel,
        ),
        Err(DocError::TxNotFound)
    ));
}

#[test]
fn revert_to_delete_delegates() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    repo.docs
        .put(&repo.path, "users", "u1", br#"{"v":1}"#, &cancel)
        .unwrap();
    let deleted = repo.docs.delete(&repo.path, "users", "u1", &cancel).unwrap();
    repo.docs
        .put(&repo.path, "users", "u1", br#"{"v":2}"#, &cancel)
        .unwrap();

    let target = RevertTarget {
        tx_id: Some(deleted.tx_id.clone()),
        tx_hash: None,
    };
    repo.docs
        .revert(&repo.path, "users", "u1", &target, &cancel)
        .unwrap();
    assert!(matches!(
        repo.docs.get(&repo.path, "users", "u1", &cancel),
        Err(DocError::DocDeleted)
    ));
}

#[test]
fn documents_are_isolated_per_stream() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    repo.docs
        .put(&repo.path, "users", "u1", br#"{"who":"u1"}"#, &cancel)
        .unwrap();
    repo.docs
        .put(&repo.path, "users", "u2", br#"{"who":"u2"}"#, &cancel)
        .unwrap();
    repo.docs
        .put(&repo.path, "orders", "u1", br#"{"who":"order"}"#, &cancel)
        .unwrap();

    let u1 = repo.docs.get(&repo.path, "users", "u1", &cancel).unwrap();
    let u2 = repo.docs.get(&repo.path, "users", "u2", &cancel).unwrap();
    let order = repo.docs.get(&repo.path, "orders", "u1", &cancel).unwrap();
    assert_eq!(u1.payload, br#"{"who":"u1"}"#);
    assert_eq!(u2.payload, br#"{"who":"u2"}"#);
    assert_eq!(order.payload, br#"{"who":"order"}"#);

    assert_eq!(
        repo.docs.log(&repo.path, "users", "u1", &cancel).unwrap().len(),
        1
    );
}

#[test]
fn mirror_snapshot_matches_chain_replay() {
    use ledgerdb::core::{state_path, stream_path, sum_hex};
    use ledgerdb::doc::chain;
    use ledgerdb::git::StreamStore;

    let repo = fixtures::append_repo();
    let cancel = Cancel::new();

    repo.docs
        .put(&repo.path, "users", "u1", br#"{"n":0}"#, &cancel)
        .unwrap();
    repo.docs
        .patch(
            &repo.path,
            "users",
            "u1",
            br#"[{"op":"replace","path":"/n","value":1}]"#,
            &cancel,
        )
        .unwrap();
    repo.docs
        .patch(
            &repo.path,
            "users",
            "u1",
            br#"[{"op":"add","path":"/m","value":2}]"#,
            &cancel,
        )
        .unwrap();

    let store = StreamStore::new(repo.history_mode);
    let stream = stream_path(repo.layout, "users", "u1");
    let mirror = state_path(repo.layout, "users", "u1");

    // Replay the full chain.
    let head_blob = store.load_head_tx(&repo.path, &stream, &cancel).unwrap().unwrap();
    let blobs = store.load_stream_txs(&repo.path, &stream, &cancel).unwrap();
    let index = chain::build_tx_index(&blobs, false).unwrap();
    let entries = chain::build_chain(&sum_hex(&head_blob.bytes), &index).unwrap();
    let (replayed, _) =
        chain::rehydrate(&entries, repo.caps.patcher.as_deref(), &cancel).unwrap();

    // The mirror snapshot must agree byte-for-byte.
    let mirror_blob = store.load_head_tx(&repo.path, &mirror, &cancel).unwrap().unwrap();
    let mirror_tx = ledgerdb::core::decode(&mirror_blob.bytes).unwrap();
    assert_eq!(mirror_tx.snapshot.as_deref(), Some(replayed.as_slice()));
}

#[test]
fn canceled_operation_short_circuits() {
    let repo = fixtures::append_repo();
    let cancel = Cancel::new();
    cancel.cancel();
    assert!(matches!(
        repo.docs.put(&repo.path, "users", "u1", b"{}", &cancel),
        Err(DocError::Canceled(_))
    ));
}
