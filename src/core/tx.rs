//! Transaction record: the unit of document mutation.
//!
//! A tx is immutable once committed. Chains of txs linked by `parent_hash`
//! form the history of one (collection, doc_id) stream.

use serde::{Deserialize, Serialize};

use super::error::InvalidTx;

/// Operation kind carried by a tx.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxOp {
    Put,
    Patch,
    Delete,
    Merge,
}

impl TxOp {
    pub fn as_str(self) -> &'static str {
        match self {
            TxOp::Put => "put",
            TxOp::Patch => "patch",
            TxOp::Delete => "delete",
            TxOp::Merge => "merge",
        }
    }
}

impl std::fmt::Display for TxOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document mutation.
///
/// `parent_hash` is the hex content hash of the previous tx in the stream,
/// empty for the root (and always empty in amend history mode).
/// `snapshot` and `patch` are canonical JSON payload bytes; at most one is
/// present, governed by `op`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub tx_id: String,
    pub timestamp: i64,
    pub collection: String,
    pub doc_id: String,
    pub op: TxOp,
    pub parent_hash: String,
    pub schema_version: String,
    pub snapshot: Option<Vec<u8>>,
    pub patch: Option<Vec<u8>>,
}

impl Transaction {
    /// Enforce the semantic invariants that must hold at encode time.
    pub fn validate(&self) -> Result<(), InvalidTx> {
        if self.tx_id.is_empty() {
            return Err(InvalidTx::TxIdRequired);
        }
        if self.timestamp == 0 {
            return Err(InvalidTx::TimestampRequired);
        }
        if self.collection.is_empty() {
            return Err(InvalidTx::CollectionRequired);
        }
        if self.doc_id.is_empty() {
            return Err(InvalidTx::DocIdRequired);
        }
        if self.snapshot.is_some() && self.patch.is_some() {
            return Err(InvalidTx::MultiplePayloads);
        }

        match self.op {
            TxOp::Put => {
                if self.snapshot.is_none() {
                    return Err(InvalidTx::MissingPayload { op: self.op });
                }
            }
            TxOp::Patch => {
                if self.patch.is_none() {
                    return Err(InvalidTx::MissingPayload { op: self.op });
                }
            }
            TxOp::Delete => {
                if self.snapshot.is_some() || self.patch.is_some() {
                    return Err(InvalidTx::UnexpectedPayload { op: self.op });
                }
            }
            TxOp::Merge => {
                if self.snapshot.is_none() && self.patch.is_none() {
                    return Err(InvalidTx::MissingPayload { op: self.op });
                }
            }
        }

        Ok(())
    }

    /// Copy of this tx projected for the state mirror: same content, no
    /// parent link.
    pub fn as_state_projection(&self) -> Transaction {
        let mut state = self.clone();
        state.parent_hash.clear();
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_tx(op: TxOp) -> Transaction {
        Transaction {
            tx_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            timestamp: 1_700_000_000_000_000_000,
            collection: "users".to_string(),
            doc_id: "u1".to_string(),
            op,
            parent_hash: String::new(),
            schema_version: String::new(),
            snapshot: None,
            patch: None,
        }
    }

    #[test]
    fn put_requires_snapshot() {
        let mut tx = base_tx(TxOp::Put);
        assert!(matches!(
            tx.validate(),
            Err(InvalidTx::MissingPayload { op: TxOp::Put })
        ));
        tx.snapshot = Some(b"{}".to_vec());
        assert!(tx.validate().is_ok());
    }

    #[test]
    fn patch_requires_patch_payload() {
        let mut tx = base_tx(TxOp::Patch);
        assert!(tx.validate().is_err());
        tx.patch = Some(b"[]".to_vec());
        assert!(tx.validate().is_ok());
    }

    #[test]
    fn delete_forbids_payloads() {
        let mut tx = base_tx(TxOp::Delete);
        assert!(tx.validate().is_ok());
        tx.snapshot = Some(b"{}".to_vec());
        assert!(matches!(
            tx.validate(),
            Err(InvalidTx::UnexpectedPayload { op: TxOp::Delete })
        ));
    }

    #[test]
    fn merge_requires_some_payload() {
        let mut tx = base_tx(TxOp::Merge);
        assert!(tx.validate().is_err());
        tx.patch = Some(b"[]".to_vec());
        assert!(tx.validate().is_ok());
        tx.patch = None;
        tx.snapshot = Some(b"{}".to_vec());
        assert!(tx.validate().is_ok());
    }

    #[test]
    fn both_payloads_rejected() {
        let mut tx = base_tx(TxOp::Merge);
        tx.snapshot = Some(b"{}".to_vec());
        tx.patch = Some(b"[]".to_vec());
        assert!(matches!(tx.validate(), Err(InvalidTx::MultiplePayloads)));
    }

    #[test]
    fn required_scalars() {
        let mut tx = base_tx(TxOp::Delete);
        tx.tx_id.clear();
        assert!(matches!(tx.validate(), Err(InvalidTx::TxIdRequired)));

        let mut tx = base_tx(TxOp::Delete);
        tx.timestamp = 0;
        assert!(matches!(tx.validate(), Err(InvalidTx::TimestampRequired)));

        let mut tx = base_tx(TxOp::Delete);
        tx.collection.clear();
        assert!(matches!(tx.validate(), Err(InvalidTx::CollectionRequired)));

        let mut tx = base_tx(TxOp::Delete);
        tx.doc_id.clear();
        assert!(matches!(tx.validate(), Err(InvalidTx::DocIdRequired)));
    }

    #[test]
    fn state_projection_drops_parent() {
        let mut tx = base_tx(TxOp::Put);
        tx.snapshot = Some(b"{}".to_vec());
        tx.parent_hash = "ab".repeat(32);
        let state = tx.as_state_projection();
        assert!(state.parent_hash.is_empty());
        assert_eq!(state.snapshot, tx.snapshot);
    }
}
