//! Stream store: publishes tx blobs into per-document streams and keeps the
//! HEAD pointer plus the state mirror consistent, all through single commits
//! CAS'd onto `refs/heads/main`.
//!
//! The CAS retry loop lives here and only here.

use std::path::Path;
use std::time::Duration;

use git2::Tree;

use super::error::StoreError;
use super::odb::{CasOutcome, Odb, MAIN_REF};
use crate::core::{
    sum_hex, Cancel, HistoryMode, Transaction, DOCUMENTS_ROOT, DOC_DIR_PREFIX, STREAM_HEAD_FILE,
    TX_COMPACT_FILE, TX_DIR, TX_FILE_EXT,
};

const CAS_MAX_RETRIES: u32 = 5;
const CAS_BACKOFF_BASE: Duration = Duration::from_millis(25);

/// One tx blob read back from a stream.
#[derive(Clone, Debug)]
pub struct TxBlob {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// A publish request for one stream, with an optional state-mirror
/// projection written in the same commit.
#[derive(Clone, Debug)]
pub struct TxWrite {
    pub stream_path: String,
    pub tx_bytes: Vec<u8>,
    pub tx_hash: String,
    pub tx: Transaction,
    pub state_path: Option<String>,
    pub state_tx_bytes: Option<Vec<u8>>,
    pub state_tx_hash: Option<String>,
}

/// Receipt for a published tx.
#[derive(Clone, Debug)]
pub struct PutOutcome {
    pub commit: String,
    pub tx_hash: String,
    pub tx_id: String,
}

/// Stateless store over a repository path; every call opens the repo fresh,
/// so concurrent writers from different handles are safe.
#[derive(Clone, Copy, Debug)]
pub struct StreamStore {
    history_mode: HistoryMode,
}

impl StreamStore {
    pub fn new(history_mode: HistoryMode) -> Self {
        Self { history_mode }
    }

    pub fn history_mode(&self) -> HistoryMode {
        self.history_mode
    }

    /// Content hash of the stream's current head tx, or `None` for an
    /// absent or empty stream.
    pub fn load_stream_head(
        &self,
        repo_path: &Path,
        stream_path: &str,
        cancel: &Cancel,
    ) -> Result<Option<String>, StoreError> {
        cancel.check()?;
        let odb = Odb::open(repo_path)?;
        let Some((_, tree)) = odb.ref_tree(MAIN_REF)? else {
            return Ok(None);
        };
        head_hash_in_tree(&odb, &tree, stream_path)
    }

    /// The head tx blob itself (path + bytes), or `None` when the stream
    /// has no head.
    pub fn load_head_tx(
        &self,
        repo_path: &Path,
        stream_path: &str,
        cancel: &Cancel,
    ) -> Result<Option<TxBlob>, StoreError> {
        cancel.check()?;
        let odb = Odb::open(repo_path)?;
        let Some((_, tree)) = odb.ref_tree(MAIN_REF)? else {
            return Ok(None);
        };
        let Some(rel) = head_pointer_in_tree(&odb, &tree, stream_path)? else {
            return Ok(None);
        };
        let tx_path = format!("{stream_path}/{rel}");
        match odb.read_tree_path(&tree, &tx_path)? {
            Some(bytes) => Ok(Some(TxBlob {
                path: tx_path,
                bytes,
            })),
            None => Err(StoreError::StreamTxMissing { path: tx_path }),
        }
    }

    /// Every `*.tx` blob under `<stream>/txs/`. Absent streams yield an
    /// empty list.
    pub fn load_stream_txs(
        &self,
        repo_path: &Path,
        stream_path: &str,
        cancel: &Cancel,
    ) -> Result<Vec<TxBlob>, StoreError> {
        cancel.check()?;
        let odb = Odb::open(repo_path)?;
        let Some((_, tree)) = odb.ref_tree(MAIN_REF)? else {
            return Ok(Vec::new());
        };
        let Some(stream_tree) = odb.subtree(&tree, stream_path)? else {
            return Ok(Vec::new());
        };
        let Some(tx_tree) = odb.subtree(&stream_tree, TX_DIR)? else {
            return Ok(Vec::new());
        };

        let mut blobs = Vec::new();
        for entry in tx_tree.iter() {
            cancel.check()?;
            if entry.kind() != Some(git2::ObjectType::Blob) {
                continue;
            }
            let Some(name) = entry.name() else { continue };
            if !name.ends_with(TX_FILE_EXT) {
                continue;
            }
            let bytes = odb.read_blob(entry.id())?;
            blobs.push(TxBlob {
                path: format!("{stream_path}/{TX_DIR}/{name}"),
                bytes,
            });
        }
        Ok(blobs)
    }

    /// All stream directories under `documents/`, sorted.
    pub fn list_doc_streams(
        &self,
        repo_path: &Path,
        cancel: &Cancel,
    ) -> Result<Vec<String>, StoreError> {
        cancel.check()?;
        let odb = Odb::open(repo_path)?;
        let Some((_, tree)) = odb.ref_tree(MAIN_REF)? else {
            return Ok(Vec::new());
        };
        let Some(docs_tree) = odb.subtree(&tree, DOCUMENTS_ROOT)? else {
            return Ok(Vec::new());
        };

        let mut streams = Vec::new();
        for entry in docs_tree.iter() {
            cancel.check()?;
            if entry.kind() != Some(git2::ObjectType::Tree) {
                continue;
            }
            let Some(collection) = entry.name() else { continue };
            let collection_tree = odb.find_tree(entry.id())?;
            let base = format!("{DOCUMENTS_ROOT}/{collection}");
            collect_doc_streams(&odb, &collection_tree, &base, cancel, &mut streams)?;
        }
        streams.sort();
        Ok(streams)
    }

    /// Publish a tx (and optional state projection) as one commit.
    ///
    /// Each attempt re-reads the ref and the stream head; in append mode a
    /// head that no longer equals the tx's `parent_hash` fails with
    /// `HeadChanged`. Ref contention retries up to 5 times with exponential
    /// backoff before surfacing `HeadChanged` itself.
    pub fn put_tx(
        &self,
        repo_path: &Path,
        write: &TxWrite,
        cancel: &Cancel,
    ) -> Result<PutOutcome, StoreError> {
        cancel.check()?;
        let odb = Odb::open(repo_path)?;

        let amend = self.history_mode == HistoryMode::Amend;
        let file_name = if amend {
            TX_COMPACT_FILE.to_string()
        } else {
            crate::core::tx_file_name(&write.tx)
        };
        let rel_tx_path = format!("{TX_DIR}/{file_name}");
        let rel_state_tx_path = format!("{TX_DIR}/{TX_COMPACT_FILE}");

        let tx_blob = odb.put_blob(&write.tx_bytes)?;
        let head_blob = odb.put_blob(format!("{rel_tx_path}\n").as_bytes())?;
        let state_blobs = match (&write.state_path, &write.state_tx_bytes) {
            (Some(path), Some(bytes)) => {
                let tx = odb.put_blob(bytes)?;
                let head = odb.put_blob(format!("{rel_state_tx_path}\n").as_bytes())?;
                Some((path.clone(), tx, head))
            }
            _ => None,
        };

        for attempt in 0..CAS_MAX_RETRIES {
            cancel.check()?;

            let base = odb.ref_tree(MAIN_REF)?;
            let base_commit = base.as_ref().map(|(oid, _)| *oid);
            let base_tree = base.as_ref().map(|(_, tree)| tree.id());

            if !amend {
                let current = match &base {
                    Some((_, tree)) => head_hash_in_tree(&odb, tree, &write.stream_path)?,
                    None => None,
                };
                if current.unwrap_or_default() != write.tx.parent_hash {
                    return Err(StoreError::HeadChanged);
                }
            }

            let mut root = odb.upsert_path(
                base_tree,
                &format!("{}/{rel_tx_path}", write.stream_path),
                tx_blob,
            )?;
            root = odb.upsert_path(
                Some(root),
                &format!("{}/{STREAM_HEAD_FILE}", write.stream_path),
                head_blob,
            )?;
            if let Some((state_path, state_tx, state_head)) = &state_blobs {
                root = odb.upsert_path(
                    Some(root),
                    &format!("{state_path}/{rel_state_tx_path}"),
                    *state_tx,
                )?;
                root = odb.upsert_path(
                    Some(root),
                    &format!("{state_path}/{STREAM_HEAD_FILE}"),
                    *state_head,
                )?;
            }

            // Amend mode collapses history: the commit replaces parentage.
            let commit_parent = if amend { None } else { base_commit };
            let message = format!("ledger tx {}", write.tx.tx_id);
            let commit = odb.put_commit(root, commit_parent, &message)?;

            match odb.check_and_set_ref(MAIN_REF, base_commit, commit)? {
                CasOutcome::Ok => {
                    tracing::debug!(
                        commit = %commit,
                        tx_id = %write.tx.tx_id,
                        stream = %write.stream_path,
                        "tx published"
                    );
                    return Ok(PutOutcome {
                        commit: commit.to_string(),
                        tx_hash: write.tx_hash.clone(),
                        tx_id: write.tx.tx_id.clone(),
                    });
                }
                CasOutcome::RefChanged => {
                    if attempt + 1 == CAS_MAX_RETRIES {
                        return Err(StoreError::HeadChanged);
                    }
                    let backoff = CAS_BACKOFF_BASE * 2u32.pow(attempt);
                    tracing::debug!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        stream = %write.stream_path,
                        "ref contention, retrying"
                    );
                    cancel.sleep(backoff)?;
                }
            }
        }

        Err(StoreError::HeadChanged)
    }
}

/// Relative tx path named by `<stream>/HEAD`, or `None` when the pointer
/// file is absent or blank.
fn head_pointer_in_tree(
    odb: &Odb,
    tree: &Tree<'_>,
    stream_path: &str,
) -> Result<Option<String>, StoreError> {
    let head_path = format!("{stream_path}/{STREAM_HEAD_FILE}");
    let Some(content) = odb.read_tree_path(tree, &head_path)? else {
        return Ok(None);
    };
    let rel = String::from_utf8_lossy(&content).trim().to_string();
    if rel.is_empty() {
        return Ok(None);
    }
    Ok(Some(rel))
}

/// Hash of the tx the stream's HEAD points at.
fn head_hash_in_tree(
    odb: &Odb,
    tree: &Tree<'_>,
    stream_path: &str,
) -> Result<Option<String>, StoreError> {
    let Some(rel) = head_pointer_in_tree(odb, tree, stream_path)? else {
        return Ok(None);
    };
    let tx_path = format!("{stream_path}/{rel}");
    match odb.read_tree_path(tree, &tx_path)? {
        Some(bytes) => Ok(Some(sum_hex(&bytes))),
        None => Err(StoreError::StreamTxMissing { path: tx_path }),
    }
}

fn collect_doc_streams(
    odb: &Odb,
    tree: &Tree<'_>,
    base: &str,
    cancel: &Cancel,
    out: &mut Vec<String>,
) -> Result<(), StoreError> {
    for entry in tree.iter() {
        cancel.check()?;
        if entry.kind() != Some(git2::ObjectType::Tree) {
            continue;
        }
        let Some(name) = entry.name() else { continue };
        let full = format!("{base}/{name}");
        if name.starts_with(DOC_DIR_PREFIX) {
            out.push(full);
            continue;
        }
        let child = odb.find_tree(entry.id())?;
        collect_doc_streams(odb, &child, &full, cancel, out)?;
    }
    Ok(())
}
