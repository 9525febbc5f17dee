//! Chain builder and rehydrator.
//!
//! Shared by Get, Revert, the verifier, and the snapshot service; the
//! rehydrate state machine MUST behave identically for all of them.

use std::collections::{HashMap, HashSet};

use super::error::DocError;
use crate::core::{decode, sum_hex, Cancel, Patcher, Transaction, TxOp};
use crate::git::TxBlob;

/// One decoded tx keyed by the content hash of its wire bytes.
#[derive(Clone, Debug)]
pub struct ChainEntry {
    pub hash: String,
    pub tx: Transaction,
}

pub type TxIndex = HashMap<String, ChainEntry>;

/// Decode every blob and index it by content hash. Hash collisions within
/// one stream are corruption.
pub fn build_tx_index(blobs: &[TxBlob], validate: bool) -> Result<TxIndex, DocError> {
    let mut index = TxIndex::with_capacity(blobs.len());
    for blob in blobs {
        let tx = decode(&blob.bytes)?;
        if validate {
            tx.validate()?;
        }
        let hash = sum_hex(&blob.bytes);
        if index.contains_key(&hash) {
            return Err(DocError::DuplicateTx { hash });
        }
        index.insert(hash.clone(), ChainEntry { hash, tx });
    }
    Ok(index)
}

/// Walk parent links from `head_hash` to the root, producing
/// `[head, ..., root]`. Cycles and missing parents are fatal.
pub fn build_chain(head_hash: &str, index: &TxIndex) -> Result<Vec<ChainEntry>, DocError> {
    let mut chain = Vec::new();
    let mut visited: HashSet<&str> = HashSet::with_capacity(index.len());
    let mut current = head_hash;
    while !current.is_empty() {
        if !visited.insert(current) {
            return Err(DocError::ChainCycle {
                hash: current.to_string(),
            });
        }
        let Some(entry) = index.get(current) else {
            return Err(DocError::MissingTx {
                hash: current.to_string(),
            });
        };
        chain.push(entry.clone());
        current = &entry.tx.parent_hash;
    }
    Ok(chain)
}

/// Replay a chain root-to-head into the current document bytes.
///
/// Returns the document and the head entry. A DELETE anywhere surfaces
/// `DocDeleted` immediately; an exhausted chain with no document is
/// `DocNotFound`.
pub fn rehydrate(
    chain: &[ChainEntry],
    patcher: Option<&dyn Patcher>,
    cancel: &Cancel,
) -> Result<(Vec<u8>, ChainEntry), DocError> {
    let mut doc: Option<Vec<u8>> = None;

    for entry in chain.iter().rev() {
        cancel.check()?;
        let tx = &entry.tx;
        match tx.op {
            TxOp::Put => {
                doc = tx.snapshot.clone();
            }
            TxOp::Patch => {
                let patcher = patcher.ok_or(DocError::PatchUnsupported)?;
                let base = doc.as_deref().ok_or(DocError::PatchUnsupported)?;
                let patch = tx.patch.as_deref().unwrap_or_default();
                doc = Some(patcher.apply(base, patch)?);
            }
            TxOp::Delete => return Err(DocError::DocDeleted),
            TxOp::Merge => {
                if let Some(snapshot) = &tx.snapshot {
                    doc = Some(snapshot.clone());
                    continue;
                }
                let patch = tx.patch.as_deref().ok_or(DocError::PatchUnsupported)?;
                let patcher = patcher.ok_or(DocError::PatchUnsupported)?;
                let base = doc.as_deref().ok_or(DocError::PatchUnsupported)?;
                doc = Some(patcher.apply(base, patch)?);
            }
        }
    }

    let Some(doc) = doc else {
        return Err(DocError::DocNotFound);
    };
    let head = chain
        .first()
        .cloned()
        .ok_or(DocError::DocNotFound)?;
    Ok((doc, head))
}
