//! Stream path derivation and naming rules.
//!
//! Every (collection, doc_id) pair maps to a deterministic directory in the
//! object database tree. Paths always use forward slashes: they address git
//! tree entries, not the host filesystem.

use super::hash::sum_hex;
use super::manifest::StreamLayout;

/// Root tree directory holding tx history streams.
pub const DOCUMENTS_ROOT: &str = "documents";
/// Root tree directory holding the compact state mirror.
pub const STATE_ROOT: &str = "state";
/// Per-stream subdirectory holding tx blobs.
pub const TX_DIR: &str = "txs";
/// Per-stream pointer file naming the current head tx.
pub const STREAM_HEAD_FILE: &str = "HEAD";
/// Prefix of the leaf directory for each stream.
pub const DOC_DIR_PREFIX: &str = "DOC_";

/// Hex digest addressing a stream: `SHA-256(collection + "/" + doc_id)`.
pub fn hds_hash(collection: &str, doc_id: &str) -> String {
    let mut payload = Vec::with_capacity(collection.len() + doc_id.len() + 1);
    payload.extend_from_slice(collection.as_bytes());
    payload.push(b'/');
    payload.extend_from_slice(doc_id.as_bytes());
    sum_hex(&payload)
}

/// Tree path of the tx history stream for a document.
pub fn stream_path(layout: StreamLayout, collection: &str, doc_id: &str) -> String {
    sharded_path(DOCUMENTS_ROOT, layout, collection, doc_id)
}

/// Tree path of the state-mirror stream for a document.
pub fn state_path(layout: StreamLayout, collection: &str, doc_id: &str) -> String {
    sharded_path(STATE_ROOT, layout, collection, doc_id)
}

fn sharded_path(root: &str, layout: StreamLayout, collection: &str, doc_id: &str) -> String {
    let hash = hds_hash(collection, doc_id);
    match layout {
        StreamLayout::Sharded => format!(
            "{root}/{collection}/{}/{}/{DOC_DIR_PREFIX}{hash}",
            &hash[0..2],
            &hash[2..4],
        ),
        StreamLayout::Flat => format!("{root}/{collection}/{DOC_DIR_PREFIX}{hash}"),
    }
}

/// Collection names address tree directories directly, so path separators
/// and traversal sequences are rejected.
pub fn is_valid_collection_name(name: &str) -> bool {
    !name.contains('/') && !name.contains('\\') && !name.contains("..")
}
