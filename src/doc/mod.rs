//! Document services: the public operations over streams.
//!
//! All operations normalize inputs the same way (trim, validate collection
//! name, resolve the repo path) and share the chain rehydrator.

pub mod chain;
pub mod error;

use std::path::{Path, PathBuf};

pub use error::DocError;

use crate::core::{
    encode, state_path, stream_path, sum_hex, Cancel, Caps, HistoryMode, StreamLayout,
    Transaction, TxOp,
};
use crate::git::{StreamStore, TxWrite};

/// Receipt for a committed mutation.
#[derive(Clone, Debug)]
pub struct PutReceipt {
    pub commit: String,
    pub tx_hash: String,
    pub tx_id: String,
}

/// A materialized document plus its head tx metadata.
#[derive(Clone, Debug)]
pub struct GetResult {
    pub payload: Vec<u8>,
    pub tx_hash: String,
    pub tx_id: String,
    pub op: TxOp,
}

/// One line of stream history, head-to-root.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub tx_id: String,
    pub tx_hash: String,
    pub parent_hash: String,
    pub timestamp: i64,
    pub op: TxOp,
}

/// Which tx a revert targets. Exactly one reference must be set.
#[derive(Clone, Debug, Default)]
pub struct RevertTarget {
    pub tx_id: Option<String>,
    pub tx_hash: Option<String>,
}

/// Document service bundle. Stateless; holds immutable capability handles.
#[derive(Clone)]
pub struct Docs {
    caps: Caps,
    store: StreamStore,
    layout: StreamLayout,
    history_mode: HistoryMode,
}

impl Docs {
    pub fn new(caps: Caps, layout: StreamLayout, history_mode: HistoryMode) -> Self {
        Self {
            caps,
            store: StreamStore::new(history_mode),
            layout,
            history_mode,
        }
    }

    /// Wire a service from the repository's own manifest.
    pub fn for_repo(caps: Caps, repo_path: &Path) -> Result<Self, DocError> {
        let manifest = crate::repo::load_manifest(repo_path)?;
        Ok(Self::new(caps, manifest.stream_layout, manifest.history_mode))
    }

    /// Store a full document snapshot.
    pub fn put(
        &self,
        repo_path: &Path,
        collection: &str,
        doc_id: &str,
        payload: &[u8],
        cancel: &Cancel,
    ) -> Result<PutReceipt, DocError> {
        let (repo, collection, doc_id) = normalize(repo_path, collection, doc_id)?;
        if payload.is_empty() {
            return Err(DocError::PayloadRequired);
        }

        let stream = stream_path(self.layout, &collection, &doc_id);
        let parent_hash = if self.history_mode == HistoryMode::Amend {
            String::new()
        } else {
            self.store
                .load_stream_head(&repo, &stream, cancel)?
                .unwrap_or_default()
        };

        let snapshot = self.caps.canon.canonicalize(payload)?;
        let tx = Transaction {
            tx_id: self.caps.ids.new_id()?,
            timestamp: self.caps.clock.now_nanos(),
            collection: collection.clone(),
            doc_id: doc_id.clone(),
            op: TxOp::Put,
            parent_hash,
            schema_version: String::new(),
            snapshot: Some(snapshot),
            patch: None,
        };

        self.publish(&repo, &stream, &collection, &doc_id, tx, cancel)
    }

    /// Apply an RFC 6902 patch to the current document.
    pub fn patch(
        &self,
        repo_path: &Path,
        collection: &str,
        doc_id: &str,
        patch: &[u8],
        cancel: &Cancel,
    ) -> Result<PutReceipt, DocError> {
        let (repo, collection, doc_id) = normalize(repo_path, collection, doc_id)?;
        if patch.is_empty() {
            return Err(DocError::PayloadRequired);
        }

        let stream = stream_path(self.layout, &collection, &doc_id);
        let Some(head_hash) = self.store.load_stream_head(&repo, &stream, cancel)? else {
            return Err(DocError::DocNotFound);
        };

        let current = self.load_current_doc(&repo, &collection, &doc_id, &stream, &head_hash, cancel)?;

        let canonical_patch = self.caps.canon.canonicalize(patch)?;
        let patcher = self.caps.patcher.as_deref().ok_or(DocError::PatchUnsupported)?;
        let updated = patcher.apply(&current, &canonical_patch)?;

        let mut tx = Transaction {
            tx_id: self.caps.ids.new_id()?,
            timestamp: self.caps.clock.now_nanos(),
            collection: collection.clone(),
            doc_id: doc_id.clone(),
            op: TxOp::Patch,
            parent_hash: String::new(),
            schema_version: String::new(),
            snapshot: None,
            patch: None,
        };
        if self.history_mode == HistoryMode::Amend {
            // Amend mode collapses each patch into a merge snapshot.
            tx.op = TxOp::Merge;
            tx.snapshot = Some(self.caps.canon.canonicalize(&updated)?);
        } else {
            tx.patch = Some(canonical_patch);
            tx.parent_hash = head_hash;
        }

        self.publish_with_state_doc(&repo, &stream, &collection, &doc_id, tx, &updated, cancel)
    }

    /// Mark a document deleted.
    pub fn delete(
        &self,
        repo_path: &Path,
        collection: &str,
        doc_id: &str,
        cancel: &Cancel,
    ) -> Result<PutReceipt, DocError> {
        let (repo, collection, doc_id) = normalize(repo_path, collection, doc_id)?;

        let stream = stream_path(self.layout, &collection, &doc_id);
        let Some(head_blob) = self.store.load_head_tx(&repo, &stream, cancel)? else {
            return Err(DocError::DocNotFound);
        };
        let head_tx = crate::core::decode(&head_blob.bytes)?;
        if head_tx.op == TxOp::Delete {
            return Err(DocError::DocDeleted);
        }

        let parent_hash = if self.history_mode == HistoryMode::Amend {
            String::new()
        } else {
            sum_hex(&head_blob.bytes)
        };
        let tx = Transaction {
            tx_id: self.caps.ids.new_id()?,
            timestamp: self.caps.clock.now_nanos(),
            collection: collection.clone(),
            doc_id: doc_id.clone(),
            op: TxOp::Delete,
            parent_hash,
            schema_version: String::new(),
            snapshot: None,
            patch: None,
        };

        self.publish(&repo, &stream, &collection, &doc_id, tx, cancel)
    }

    /// Read the current document.
    ///
    /// The head tx blob provides the metadata in one read; the state mirror
    /// short-circuits payload materialization when it is fresh. Chain replay
    /// is the fallback.
    pub fn get(
        &self,
        repo_path: &Path,
        collection: &str,
        doc_id: &str,
        cancel: &Cancel,
    ) -> Result<GetResult, DocError> {
        let (repo, collection, doc_id) = normalize(repo_path, collection, doc_id)?;

        let stream = stream_path(self.layout, &collection, &doc_id);
        let Some(head_blob) = self.store.load_head_tx(&repo, &stream, cancel)? else {
            return Err(DocError::DocNotFound);
        };
        let head_tx = crate::core::decode(&head_blob.bytes)?;
        if head_tx.op == TxOp::Delete {
            return Err(DocError::DocDeleted);
        }
        let head_hash = sum_hex(&head_blob.bytes);

        // PUT and MERGE heads carry the document themselves.
        if matches!(head_tx.op, TxOp::Put | TxOp::Merge) {
            if let Some(snapshot) = &head_tx.snapshot {
                return Ok(GetResult {
                    payload: snapshot.clone(),
                    tx_hash: head_hash,
                    tx_id: head_tx.tx_id,
                    op: head_tx.op,
                });
            }
        }

        // Mirror short-circuit: valid only while the mirror reflects the
        // head tx (the snapshot service appends without updating it).
        let mirror = state_path(self.layout, &collection, &doc_id);
        if let Some(state_blob) = self.store.load_head_tx(&repo, &mirror, cancel)? {
            if let Ok(state_tx) = crate::core::decode(&state_blob.bytes) {
                if state_tx.op == TxOp::Delete {
                    return Err(DocError::DocDeleted);
                }
                if state_tx.tx_id == head_tx.tx_id {
                    if let Some(snapshot) = &state_tx.snapshot {
                        return Ok(GetResult {
                            payload: snapshot.clone(),
                            tx_hash: head_hash,
                            tx_id: head_tx.tx_id,
                            op: head_tx.op,
                        });
                    }
                }
            }
        }

        // Full replay.
        let blobs = self.store.load_stream_txs(&repo, &stream, cancel)?;
        let index = chain::build_tx_index(&blobs, false)?;
        let entries = chain::build_chain(&head_hash, &index)?;
        let (payload, head) = chain::rehydrate(&entries, self.caps.patcher.as_deref(), cancel)?;
        Ok(GetResult {
            payload,
            tx_hash: head.hash,
            tx_id: head.tx.tx_id,
            op: head.tx.op,
        })
    }

    /// Stream history, head-to-root.
    pub fn log(
        &self,
        repo_path: &Path,
        collection: &str,
        doc_id: &str,
        cancel: &Cancel,
    ) -> Result<Vec<LogEntry>, DocError> {
        let (repo, collection, doc_id) = normalize(repo_path, collection, doc_id)?;

        let stream = stream_path(self.layout, &collection, &doc_id);
        let Some(head_hash) = self.store.load_stream_head(&repo, &stream, cancel)? else {
            return Err(DocError::DocNotFound);
        };

        let blobs = self.store.load_stream_txs(&repo, &stream, cancel)?;
        let index = chain::build_tx_index(&blobs, false)?;
        let entries = chain::build_chain(&head_hash, &index)?;

        Ok(entries
            .into_iter()
            .map(|entry| LogEntry {
                tx_id: entry.tx.tx_id,
                tx_hash: entry.hash,
                parent_hash: entry.tx.parent_hash,
                timestamp: entry.tx.timestamp,
                op: entry.tx.op,
            })
            .collect())
    }

    /// Restore the document state as of a past tx by writing a new PUT
    /// forward in history (never by rewriting it).
    pub fn revert(
        &self,
        repo_path: &Path,
        collection: &str,
        doc_id: &str,
        target: &RevertTarget,
        cancel: &Cancel,
    ) -> Result<PutReceipt, DocError> {
        let (repo, collection, doc_id) = normalize(repo_path, collection, doc_id)?;

        let tx_id = target.tx_id.as_deref().map(str::trim).unwrap_or_default();
        let tx_hash = target.tx_hash.as_deref().map(str::trim).unwrap_or_default();
        if tx_id.is_empty() && tx_hash.is_empty() {
            return Err(DocError::TxReferenceRequired);
        }
        if !tx_id.is_empty() && !tx_hash.is_empty() {
            return Err(DocError::TxReferenceAmbiguous);
        }

        let stream = stream_path(self.layout, &collection, &doc_id);
        if self.store.load_stream_head(&repo, &stream, cancel)?.is_none() {
            return Err(DocError::DocNotFound);
        }

        let blobs = self.store.load_stream_txs(&repo, &stream, cancel)?;
        let index = chain::build_tx_index(&blobs, false)?;
        let target_hash = select_target_hash(&index, tx_id, tx_hash)?;

        let target_entry = &index[&target_hash];
        if target_entry.tx.op == TxOp::Delete {
            return self.delete(&repo, &collection, &doc_id, cancel);
        }

        let entries = chain::build_chain(&target_hash, &index)?;
        let (payload, _) = chain::rehydrate(&entries, self.caps.patcher.as_deref(), cancel)?;

        tracing::info!(
            collection = %collection,
            doc_id = %doc_id,
            target = %target_hash,
            "reverting document to prior tx"
        );
        self.put(&repo, &collection, &doc_id, &payload, cancel)
    }

    /// Current doc bytes used as the patch base: mirror snapshot when
    /// available, chain replay otherwise.
    fn load_current_doc(
        &self,
        repo: &Path,
        collection: &str,
        doc_id: &str,
        stream: &str,
        head_hash: &str,
        cancel: &Cancel,
    ) -> Result<Vec<u8>, DocError> {
        let mirror = state_path(self.layout, collection, doc_id);
        if let Some(state_blob) = self.store.load_head_tx(repo, &mirror, cancel)? {
            if let Ok(state_tx) = crate::core::decode(&state_blob.bytes) {
                match state_tx.op {
                    TxOp::Delete => return Err(DocError::DocDeleted),
                    TxOp::Put | TxOp::Merge => {
                        if let Some(snapshot) = state_tx.snapshot {
                            return Ok(snapshot);
                        }
                    }
                    TxOp::Patch => {}
                }
            }
        }

        let blobs = self.store.load_stream_txs(repo, stream, cancel)?;
        let index = chain::build_tx_index(&blobs, false)?;
        let entries = chain::build_chain(head_hash, &index)?;
        let (doc, _) = chain::rehydrate(&entries, self.caps.patcher.as_deref(), cancel)?;
        Ok(doc)
    }

    /// Encode, hash, project the state mirror from the tx itself, and write.
    fn publish(
        &self,
        repo: &Path,
        stream: &str,
        collection: &str,
        doc_id: &str,
        tx: Transaction,
        cancel: &Cancel,
    ) -> Result<PutReceipt, DocError> {
        let encoded = encode(&tx)?;
        let tx_hash = self.caps.hasher.sum_hex(&encoded);

        let state_tx = tx.as_state_projection();
        let (state_bytes, state_hash) = if tx.parent_hash.is_empty() {
            // Identical content; re-encoding would produce the same bytes.
            (encoded.clone(), tx_hash.clone())
        } else {
            let bytes = encode(&state_tx)?;
            let hash = self.caps.hasher.sum_hex(&bytes);
            (bytes, hash)
        };

        self.write(
            repo,
            stream,
            collection,
            doc_id,
            tx,
            encoded,
            tx_hash,
            state_bytes,
            state_hash,
            cancel,
        )
    }

    /// Like `publish`, but the state projection snapshot comes from the
    /// already-patched document (PATCH history txs project as MERGE).
    fn publish_with_state_doc(
        &self,
        repo: &Path,
        stream: &str,
        collection: &str,
        doc_id: &str,
        tx: Transaction,
        updated_doc: &[u8],
        cancel: &Cancel,
    ) -> Result<PutReceipt, DocError> {
        let encoded = encode(&tx)?;
        let tx_hash = self.caps.hasher.sum_hex(&encoded);

        let mut state_tx = tx.as_state_projection();
        if state_tx.op == TxOp::Patch {
            state_tx.op = TxOp::Merge;
            state_tx.patch = None;
            state_tx.snapshot = Some(self.caps.canon.canonicalize(updated_doc)?);
        }
        let (state_bytes, state_hash) = if state_tx == tx {
            (encoded.clone(), tx_hash.clone())
        } else {
            let bytes = encode(&state_tx)?;
            let hash = self.caps.hasher.sum_hex(&bytes);
            (bytes, hash)
        };

        self.write(
            repo,
            stream,
            collection,
            doc_id,
            tx,
            encoded,
            tx_hash,
            state_bytes,
            state_hash,
            cancel,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &self,
        repo: &Path,
        stream: &str,
        collection: &str,
        doc_id: &str,
        tx: Transaction,
        tx_bytes: Vec<u8>,
        tx_hash: String,
        state_bytes: Vec<u8>,
        state_hash: String,
        cancel: &Cancel,
    ) -> Result<PutReceipt, DocError> {
        let outcome = self.store.put_tx(
            repo,
            &TxWrite {
                stream_path: stream.to_string(),
                tx_bytes,
                tx_hash: tx_hash.clone(),
                tx,
                state_path: Some(state_path(self.layout, collection, doc_id)),
                state_tx_bytes: Some(state_bytes),
                state_tx_hash: Some(state_hash),
            },
            cancel,
        )?;

        Ok(PutReceipt {
            commit: outcome.commit,
            tx_hash: outcome.tx_hash,
            tx_id: outcome.tx_id,
        })
    }
}

fn normalize(
    repo_path: &Path,
    collection: &str,
    doc_id: &str,
) -> Result<(PathBuf, String, String), DocError> {
    let collection = collection.trim();
    if collection.is_empty() {
        return Err(DocError::CollectionRequired);
    }
    if !crate::core::is_valid_collection_name(collection) {
        return Err(DocError::InvalidCollection {
            name: collection.to_string(),
        });
    }

    let doc_id = doc_id.trim();
    if doc_id.is_empty() {
        return Err(DocError::DocIdRequired);
    }

    let repo = std::path::absolute(repo_path).unwrap_or_else(|_| repo_path.to_path_buf());
    Ok((repo, collection.to_string(), doc_id.to_string()))
}

fn select_target_hash(
    index: &chain::TxIndex,
    tx_id: &str,
    tx_hash: &str,
) -> Result<String, DocError> {
    if !tx_hash.is_empty() {
        if index.contains_key(tx_hash) {
            return Ok(tx_hash.to_string());
        }
        return Err(DocError::TxNotFound);
    }

    let mut found: Option<&str> = None;
    for (hash, entry) in index {
        if entry.tx.tx_id != tx_id {
            continue;
        }
        if found.is_some() {
            return Err(DocError::TxReferenceAmbiguous);
        }
        found = Some(hash);
    }
    match found {
        Some(hash) => Ok(hash.to_string()),
        None => Err(DocError::TxNotFound),
    }
}
