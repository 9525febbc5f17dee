//! Deterministic tx wire codec.
//!
//! The wire form is JSON with a fixed field order, empty optionals omitted,
//! and payload bytes embedded verbatim. Two logically-equal txs therefore
//! produce identical bytes, and the content hash of a tx is stable across
//! re-encoding.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::error::{InvalidTx, MalformedTx};
use super::tx::{Transaction, TxOp};

/// File extension for tx blobs under a stream's `txs/` directory.
pub const TX_FILE_EXT: &str = ".tx";
/// Fixed tx file name used by amend-mode streams and state mirrors.
pub const TX_COMPACT_FILE: &str = "compact.tx";

// Field order here IS the wire contract; do not reorder.
#[derive(Serialize, Deserialize)]
struct WireTx {
    tx_id: String,
    timestamp: i64,
    collection: String,
    doc_id: String,
    op: TxOp,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    parent_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    snapshot: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    patch: Option<Box<RawValue>>,
}

/// Encode a tx to deterministic bytes. Fails if validation fails or a
/// payload is not valid JSON.
pub fn encode(tx: &Transaction) -> Result<Vec<u8>, InvalidTx> {
    tx.validate()?;

    let wire = WireTx {
        tx_id: tx.tx_id.clone(),
        timestamp: tx.timestamp,
        collection: tx.collection.clone(),
        doc_id: tx.doc_id.clone(),
        op: tx.op,
        parent_hash: tx.parent_hash.clone(),
        schema_version: tx.schema_version.clone(),
        snapshot: match tx.snapshot.as_deref() {
            Some(bytes) => {
                Some(raw_payload(bytes).ok_or(InvalidTx::PayloadNotJson { op: tx.op })?)
            }
            None => None,
        },
        patch: match tx.patch.as_deref() {
            Some(bytes) => {
                Some(raw_payload(bytes).ok_or(InvalidTx::PayloadNotJson { op: tx.op })?)
            }
            None => None,
        },
    };

    // WireTx contains nothing serde_json can fail on once payloads are raw.
    Ok(serde_json::to_vec(&wire).expect("tx wire encode"))
}

/// Decode wire bytes into a tx. Does NOT re-run semantic validation.
pub fn decode(data: &[u8]) -> Result<Transaction, MalformedTx> {
    let wire: WireTx = serde_json::from_slice(data)?;
    Ok(Transaction {
        tx_id: wire.tx_id,
        timestamp: wire.timestamp,
        collection: wire.collection,
        doc_id: wire.doc_id,
        op: wire.op,
        parent_hash: wire.parent_hash,
        schema_version: wire.schema_version,
        snapshot: wire.snapshot.map(|raw| raw.get().as_bytes().to_vec()),
        patch: wire.patch.map(|raw| raw.get().as_bytes().to_vec()),
    })
}

/// File name for a tx blob: `<timestamp>_<op>.tx`.
pub fn tx_file_name(tx: &Transaction) -> String {
    format!("{}_{}{}", tx.timestamp, tx.op, TX_FILE_EXT)
}

fn raw_payload(bytes: &[u8]) -> Option<Box<RawValue>> {
    let text = std::str::from_utf8(bytes).ok()?;
    RawValue::from_string(text.to_string()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction {
            tx_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            timestamp: 1_700_000_000_000_000_000,
            collection: "users".to_string(),
            doc_id: "u1".to_string(),
            op: TxOp::Put,
            parent_hash: String::new(),
            schema_version: String::new(),
            snapshot: Some(br#"{"a":1}"#.to_vec()),
            patch: None,
        }
    }

    #[test]
    fn roundtrip_preserves_equality() {
        let tx = sample();
        let bytes = encode(&tx).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn equal_txs_encode_identically() {
        let a = encode(&sample()).unwrap();
        let b = encode(&sample()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_optionals_are_omitted() {
        let bytes = encode(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("parent_hash"));
        assert!(!text.contains("schema_version"));
        assert!(!text.contains("patch"));
    }

    #[test]
    fn parent_hash_changes_the_bytes() {
        let base = encode(&sample()).unwrap();
        let mut tx = sample();
        tx.parent_hash = "ab".repeat(32);
        let linked = encode(&tx).unwrap();
        assert_ne!(base, linked);
    }

    #[test]
    fn payload_bytes_survive_verbatim() {
        let mut tx = sample();
        tx.snapshot = Some(br#"{"b":2,"a":1}"#.to_vec());
        let back = decode(&encode(&tx).unwrap()).unwrap();
        assert_eq!(back.snapshot.as_deref(), Some(br#"{"b":2,"a":1}"#.as_ref()));
    }

    #[test]
    fn encode_validates() {
        let mut tx = sample();
        tx.snapshot = None;
        assert!(encode(&tx).is_err());
    }

    #[test]
    fn decode_skips_semantic_validation() {
        // A delete carrying a snapshot is semantically invalid but wire-legal.
        let raw = br#"{"tx_id":"x","timestamp":1,"collection":"c","doc_id":"d","op":"delete","snapshot":{"a":1}}"#;
        let tx = decode(raw).unwrap();
        assert_eq!(tx.op, TxOp::Delete);
        assert!(tx.snapshot.is_some());
        assert!(tx.validate().is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(b"not json").is_err());
        assert!(decode(br#"{"tx_id":"x","op":"explode"}"#).is_err());
    }

    #[test]
    fn file_names() {
        let mut tx = sample();
        assert_eq!(tx_file_name(&tx), "1700000000000000000_put.tx");
        tx.op = TxOp::Delete;
        tx.snapshot = None;
        assert_eq!(tx_file_name(&tx), "1700000000000000000_delete.tx");
    }
}
