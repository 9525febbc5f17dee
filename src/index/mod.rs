//! Index synchronizer: projects the tx log into an external relational
//! sidecar with resumable, ordered application.

pub mod error;
pub mod sqlite;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

pub use error::IndexError;
pub use sqlite::SqliteIndex;

use crate::core::{decode, Cancel, Canonicalizer, Hasher, Patcher, Transaction, TxOp};
use crate::git::TxBlob;

/// Resumption point recorded in the sidecar.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncState {
    pub last_commit: String,
    pub last_state_tree: String,
}

/// State-mirror delta since a recorded sync point.
#[derive(Clone, Debug, Default)]
pub struct StateTxs {
    pub head_hash: String,
    pub state_hash: String,
    pub txs: Vec<TxBlob>,
}

/// One projected document row.
#[derive(Clone, Debug, Default)]
pub struct DocRecord {
    pub doc_id: String,
    pub payload: Option<Vec<u8>>,
    pub tx_hash: String,
    pub tx_id: String,
    pub op: String,
    pub schema_version: Option<String>,
    pub updated_at: i64,
    pub deleted: bool,
}

/// Optional pre-sync fetch step (network transports live outside the core).
pub trait Fetcher: Send + Sync {
    fn fetch(&self, repo_path: &Path, cancel: &Cancel) -> Result<(), IndexError>;
}

/// Where tx blobs come from. Satisfied by the git log source.
pub trait CommitSource {
    /// Commit hashes since `since` (exclusive), oldest-first.
    fn list_commit_hashes(
        &self,
        repo_path: &Path,
        since: &str,
        cancel: &Cancel,
    ) -> Result<Vec<String>, IndexError>;

    /// Tx blobs introduced by one commit under `documents/`.
    fn commit_txs(
        &self,
        repo_path: &Path,
        commit_hash: &str,
        cancel: &Cancel,
    ) -> Result<Vec<TxBlob>, IndexError>;

    /// Tx blobs introduced by one commit under `state/`.
    fn commit_state_txs(
        &self,
        repo_path: &Path,
        commit_hash: &str,
        cancel: &Cancel,
    ) -> Result<Vec<TxBlob>, IndexError>;

    /// State-mirror delta since the recorded sync state.
    fn state_txs_since(
        &self,
        repo_path: &Path,
        state: &SyncState,
        cancel: &Cancel,
    ) -> Result<StateTxs, IndexError>;
}

/// The relational sidecar.
pub trait SidecarStore {
    fn get_state(&mut self) -> Result<SyncState, IndexError>;
    fn begin<'a>(&'a mut self) -> Result<Box<dyn SidecarTx + 'a>, IndexError>;
    fn reset(&mut self) -> Result<(), IndexError>;
}

/// One open sidecar transaction.
pub trait SidecarTx {
    fn ensure_collection(&mut self, collection: &str) -> Result<String, IndexError>;
    fn get_doc(&mut self, collection: &str, doc_id: &str)
        -> Result<Option<DocRecord>, IndexError>;
    fn upsert_doc(&mut self, collection: &str, record: &DocRecord) -> Result<(), IndexError>;
    fn set_state(&mut self, state: &SyncState) -> Result<(), IndexError>;
    fn commit(self: Box<Self>) -> Result<(), IndexError>;
    fn rollback(self: Box<Self>) -> Result<(), IndexError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    #[default]
    History,
    State,
}

#[derive(Clone, Copy, Debug)]
pub struct SyncOptions {
    pub fetch: bool,
    /// On `CommitNotFound`, wipe the sidecar and re-apply from scratch.
    /// Only valid under amend history, where rewritten parentage makes the
    /// recorded commit legitimately unreachable.
    pub allow_reset: bool,
    pub batch_commits: usize,
    pub mode: SyncMode,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            fetch: false,
            allow_reset: false,
            batch_commits: 1,
            mode: SyncMode::History,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SyncReport {
    pub reset: bool,
    pub fetched: bool,
    pub commits: usize,
    pub txs_applied: usize,
    pub docs_upserted: usize,
    pub docs_deleted: usize,
    pub collections: usize,
    pub last_commit: String,
}

pub struct SyncService {
    canon: Arc<dyn Canonicalizer>,
    patcher: Option<Arc<dyn Patcher>>,
    hasher: Arc<dyn Hasher>,
}

struct DecodedTx {
    tx: Transaction,
    bytes: Vec<u8>,
}

impl SyncService {
    pub fn new(
        canon: Arc<dyn Canonicalizer>,
        patcher: Option<Arc<dyn Patcher>>,
        hasher: Arc<dyn Hasher>,
    ) -> Self {
        Self {
            canon,
            patcher,
            hasher,
        }
    }

    pub fn sync(
        &self,
        fetcher: Option<&dyn Fetcher>,
        source: &dyn CommitSource,
        store: &mut dyn SidecarStore,
        repo_path: &Path,
        opts: &SyncOptions,
        cancel: &Cancel,
    ) -> Result<SyncReport, IndexError> {
        if opts.fetch {
            let fetcher = fetcher.ok_or(IndexError::FetchUnavailable)?;
            fetcher.fetch(repo_path, cancel)?;
        }

        if opts.mode == SyncMode::State {
            match self.sync_state(source, store, repo_path, opts, cancel) {
                // State tree absent: fall back to history transparently.
                Err(IndexError::StateUnavailable) => {}
                other => return other,
            }
        }

        self.sync_history(source, store, repo_path, opts, cancel)
    }

    fn sync_history(
        &self,
        source: &dyn CommitSource,
        store: &mut dyn SidecarStore,
        repo_path: &Path,
        opts: &SyncOptions,
        cancel: &Cancel,
    ) -> Result<SyncReport, IndexError> {
        let mut state = store.get_state()?;

        let mut reset = false;
        let commit_hashes =
            match source.list_commit_hashes(repo_path, &state.last_commit, cancel) {
                Ok(hashes) => hashes,
                Err(IndexError::CommitNotFound) if opts.allow_reset => {
                    store.reset()?;
                    reset = true;
                    state = SyncState::default();
                    source.list_commit_hashes(repo_path, "", cancel)?
                }
                Err(err) => return Err(err),
            };

        let mut report = SyncReport {
            reset,
            fetched: opts.fetch,
            commits: commit_hashes.len(),
            ..SyncReport::default()
        };

        let batch_size = opts.batch_commits.max(1);
        let mut collections = BTreeSet::new();

        for batch in commit_hashes.chunks(batch_size) {
            let mut tx = store.begin()?;
            let mut failed: Option<IndexError> = None;

            for commit_hash in batch {
                if let Err(err) = cancel.check() {
                    failed = Some(err.into());
                    break;
                }
                let result = source
                    .commit_txs(repo_path, commit_hash, cancel)
                    .and_then(|blobs| self.decode_txs(&blobs))
                    .and_then(|decoded| {
                        self.apply_txs(tx.as_mut(), &decoded, &mut collections, &mut report, cancel)
                    });
                if let Err(err) = result {
                    failed = Some(err);
                    break;
                }
                report.last_commit = commit_hash.clone();
            }

            if failed.is_none() && !report.last_commit.is_empty() {
                if let Err(err) = tx.set_state(&SyncState {
                    last_commit: report.last_commit.clone(),
                    last_state_tree: String::new(),
                }) {
                    failed = Some(err);
                }
            }

            match failed {
                Some(err) => {
                    tx.rollback()?;
                    return Err(err);
                }
                None => tx.commit()?,
            }

            tracing::debug!(
                batch = batch.len(),
                last_commit = %report.last_commit,
                "sync batch committed"
            );
        }

        report.collections = collections.len();
        if report.last_commit.is_empty() {
            report.last_commit = state.last_commit;
        }
        Ok(report)
    }

    fn sync_state(
        &self,
        source: &dyn CommitSource,
        store: &mut dyn SidecarStore,
        repo_path: &Path,
        opts: &SyncOptions,
        cancel: &Cancel,
    ) -> Result<SyncReport, IndexError> {
        let mut state = store.get_state()?;

        let mut report = SyncReport {
            fetched: opts.fetch,
            ..SyncReport::default()
        };

        let delta = match source.state_txs_since(repo_path, &state, cancel) {
            Ok(delta) => delta,
            Err(IndexError::CommitNotFound) if opts.allow_reset => {
                store.reset()?;
                report.reset = true;
                state = SyncState::default();
                source.state_txs_since(repo_path, &state, cancel)?
            }
            Err(err) => return Err(err),
        };

        // Empty repo, or nothing moved since the last sync point.
        if delta.state_hash.is_empty()
            || (delta.state_hash == state.last_state_tree
                && delta.txs.is_empty()
                && delta.head_hash == state.last_commit)
        {
            report.last_commit = state.last_commit;
            return Ok(report);
        }

        let mut tx = store.begin()?;
        let mut collections = BTreeSet::new();
        let mut failed: Option<IndexError> = None;

        if !delta.txs.is_empty() {
            let result = self.decode_txs(&delta.txs).and_then(|decoded| {
                self.apply_txs(tx.as_mut(), &decoded, &mut collections, &mut report, cancel)
            });
            if let Err(err) = result {
                failed = Some(err);
            }
        }

        if failed.is_none()
            && (delta.state_hash != state.last_state_tree || delta.head_hash != state.last_commit)
        {
            if let Err(err) = tx.set_state(&SyncState {
                last_commit: delta.head_hash.clone(),
                last_state_tree: delta.state_hash.clone(),
            }) {
                failed = Some(err);
            }
        }

        match failed {
            Some(err) => {
                tx.rollback()?;
                return Err(err);
            }
            None => tx.commit()?,
        }

        report.collections = collections.len();
        if delta.head_hash != state.last_commit {
            report.commits = 1;
        }
        report.last_commit = delta.head_hash;
        Ok(report)
    }

    /// Decode, semantically validate, and order blobs into the stable total
    /// order `(timestamp ascending, tx_id ascending)`.
    fn decode_txs(&self, blobs: &[TxBlob]) -> Result<Vec<DecodedTx>, IndexError> {
        let mut decoded = Vec::with_capacity(blobs.len());
        for blob in blobs {
            let tx = decode(&blob.bytes)?;
            tx.validate()?;
            decoded.push(DecodedTx {
                tx,
                bytes: blob.bytes.clone(),
            });
        }

        decoded.sort_by(|a, b| {
            a.tx.timestamp
                .cmp(&b.tx.timestamp)
                .then_with(|| a.tx.tx_id.cmp(&b.tx.tx_id))
        });
        Ok(decoded)
    }

    fn apply_txs(
        &self,
        sidecar: &mut dyn SidecarTx,
        txs: &[DecodedTx],
        collections: &mut BTreeSet<String>,
        report: &mut SyncReport,
        cancel: &Cancel,
    ) -> Result<(), IndexError> {
        for item in txs {
            cancel.check()?;
            let tx = &item.tx;
            sidecar.ensure_collection(&tx.collection)?;
            collections.insert(tx.collection.clone());

            match tx.op {
                TxOp::Put => {
                    let payload = self
                        .canon
                        .canonicalize(tx.snapshot.as_deref().unwrap_or_default())?;
                    sidecar.upsert_doc(
                        &tx.collection,
                        &self.record(tx, &item.bytes, Some(payload), false),
                    )?;
                    report.txs_applied += 1;
                    report.docs_upserted += 1;
                }
                TxOp::Patch => {
                    let payload = self.apply_patch(sidecar, tx)?;
                    sidecar.upsert_doc(
                        &tx.collection,
                        &self.record(tx, &item.bytes, Some(payload), false),
                    )?;
                    report.txs_applied += 1;
                    report.docs_upserted += 1;
                }
                TxOp::Merge => {
                    let payload = self.apply_merge(sidecar, tx)?;
                    sidecar.upsert_doc(
                        &tx.collection,
                        &self.record(tx, &item.bytes, Some(payload), false),
                    )?;
                    report.txs_applied += 1;
                    report.docs_upserted += 1;
                }
                TxOp::Delete => {
                    sidecar
                        .upsert_doc(&tx.collection, &self.record(tx, &item.bytes, None, true))?;
                    report.txs_applied += 1;
                    report.docs_deleted += 1;
                }
            }
        }
        Ok(())
    }

    fn apply_patch(
        &self,
        sidecar: &mut dyn SidecarTx,
        tx: &Transaction,
    ) -> Result<Vec<u8>, IndexError> {
        let patcher = self.patcher.as_deref().ok_or(IndexError::PatchUnsupported)?;
        let record = sidecar.get_doc(&tx.collection, &tx.doc_id)?;
        let record = match record {
            Some(record) if !record.deleted => record,
            _ => {
                return Err(IndexError::MissingDocument {
                    collection: tx.collection.clone(),
                    doc_id: tx.doc_id.clone(),
                });
            }
        };
        let updated = patcher.apply(
            record.payload.as_deref().unwrap_or_default(),
            tx.patch.as_deref().unwrap_or_default(),
        )?;
        Ok(self.canon.canonicalize(&updated)?)
    }

    fn apply_merge(
        &self,
        sidecar: &mut dyn SidecarTx,
        tx: &Transaction,
    ) -> Result<Vec<u8>, IndexError> {
        if let Some(snapshot) = &tx.snapshot {
            return Ok(self.canon.canonicalize(snapshot)?);
        }
        self.apply_patch(sidecar, tx)
    }

    fn record(
        &self,
        tx: &Transaction,
        tx_bytes: &[u8],
        payload: Option<Vec<u8>>,
        deleted: bool,
    ) -> DocRecord {
        DocRecord {
            doc_id: tx.doc_id.clone(),
            payload,
            tx_hash: self.hasher.sum_hex(tx_bytes),
            tx_id: tx.tx_id.clone(),
            op: tx.op.as_str().to_string(),
            schema_version: if tx.schema_version.is_empty() {
                None
            } else {
                Some(tx.schema_version.clone())
            },
            updated_at: tx.timestamp,
            deleted,
        }
    }
}
