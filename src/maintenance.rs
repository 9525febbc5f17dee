//! Snapshot/compaction service.
//!
//! Bounds chain length by appending MERGE txs that carry the rehydrated
//! document, preserving equivalence. Per-stream failures become issues; the
//! run keeps going.

use std::path::Path;

use thiserror::Error;

use crate::core::{encode, Cancel, Caps, HistoryMode, Transaction, TxOp};
use crate::doc::chain::{build_chain, build_tx_index, rehydrate};
use crate::doc::DocError;
use crate::git::{StoreError, StreamStore, TxWrite};

pub const ISSUE_HEAD_READ: &str = "head_read";
pub const ISSUE_HEAD_MISSING: &str = "head_missing";
pub const ISSUE_TX_READ: &str = "tx_read";
pub const ISSUE_TX_MISSING: &str = "tx_missing";
pub const ISSUE_TX_DECODE: &str = "tx_decode";
pub const ISSUE_TX_INVALID: &str = "tx_invalid";
pub const ISSUE_CHAIN: &str = "chain_invalid";
pub const ISSUE_REHYDRATE: &str = "rehydrate_failed";
pub const ISSUE_CANONICALIZE: &str = "canonicalize_failed";
pub const ISSUE_WRITE: &str = "write_failed";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("threshold must be greater than zero")]
    InvalidThreshold,
    #[error(transparent)]
    Doc(#[from] DocError),
}

impl SnapshotError {
    pub fn transience(&self) -> crate::error::Transience {
        match self {
            SnapshotError::InvalidThreshold => crate::error::Transience::Permanent,
            SnapshotError::Doc(err) => err.transience(),
        }
    }

    pub fn effect(&self) -> crate::error::Effect {
        match self {
            SnapshotError::InvalidThreshold => crate::error::Effect::None,
            // Some streams may have been snapshotted before the failure.
            SnapshotError::Doc(err) => err.effect(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SnapshotOptions {
    /// Streams at or under this chain length are skipped.
    pub threshold: usize,
    /// Stop after this many snapshots (0 = unlimited).
    pub max: usize,
    /// Plan without writing.
    pub dry_run: bool,
}

#[derive(Clone, Debug)]
pub struct Issue {
    pub stream_path: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct SnapshotReport {
    pub streams: usize,
    pub processed: usize,
    pub snapshotted: usize,
    pub planned: usize,
    pub skipped: usize,
    pub truncated: bool,
    pub dry_run: bool,
    pub issues: Vec<Issue>,
}

enum Action {
    Skipped,
    Planned,
    Created,
}

pub struct SnapshotService {
    caps: Caps,
    store: StreamStore,
    history_mode: HistoryMode,
}

impl SnapshotService {
    pub fn new(caps: Caps, history_mode: HistoryMode) -> Self {
        Self {
            caps,
            store: StreamStore::new(history_mode),
            history_mode,
        }
    }

    pub fn snapshot(
        &self,
        repo_path: &Path,
        opts: SnapshotOptions,
        cancel: &Cancel,
    ) -> Result<SnapshotReport, SnapshotError> {
        if opts.threshold == 0 {
            return Err(SnapshotError::InvalidThreshold);
        }

        let repo = std::path::absolute(repo_path).unwrap_or_else(|_| repo_path.to_path_buf());
        let streams = self
            .store
            .list_doc_streams(&repo, cancel)
            .map_err(DocError::from)?;

        let mut report = SnapshotReport {
            streams: streams.len(),
            dry_run: opts.dry_run,
            ..SnapshotReport::default()
        };

        for stream in &streams {
            cancel.check().map_err(DocError::from)?;

            if opts.max > 0 && report.snapshotted + report.planned >= opts.max {
                report.truncated = true;
                break;
            }

            report.processed += 1;
            match self.snapshot_stream(&repo, stream, &opts, cancel)? {
                Ok(Action::Created) => report.snapshotted += 1,
                Ok(Action::Planned) => report.planned += 1,
                Ok(Action::Skipped) => report.skipped += 1,
                Err(issues) => report.issues.extend(issues),
            }
        }

        tracing::info!(
            streams = report.streams,
            snapshotted = report.snapshotted,
            planned = report.planned,
            skipped = report.skipped,
            truncated = report.truncated,
            "snapshot pass complete"
        );
        Ok(report)
    }

    fn snapshot_stream(
        &self,
        repo: &Path,
        stream: &str,
        opts: &SnapshotOptions,
        cancel: &Cancel,
    ) -> Result<Result<Action, Vec<Issue>>, DocError> {
        let head_hash = match self.store.load_stream_head(repo, stream, cancel) {
            Ok(Some(hash)) => hash,
            Ok(None) => return Ok(Err(vec![issue(stream, ISSUE_HEAD_MISSING, "HEAD not found")])),
            Err(StoreError::Canceled(err)) => return Err(err.into()),
            Err(err) => return Ok(Err(vec![issue(stream, ISSUE_HEAD_READ, err)])),
        };

        let blobs = match self.store.load_stream_txs(repo, stream, cancel) {
            Ok(blobs) => blobs,
            Err(StoreError::Canceled(err)) => return Err(err.into()),
            Err(err) => return Ok(Err(vec![issue(stream, ISSUE_TX_READ, err)])),
        };
        if blobs.is_empty() {
            return Ok(Err(vec![issue(stream, ISSUE_TX_MISSING, "no tx blobs found")]));
        }

        let index = match build_tx_index(&blobs, true) {
            Ok(index) => index,
            Err(DocError::Canceled(err)) => return Err(err.into()),
            Err(err @ DocError::Malformed(_)) => {
                return Ok(Err(vec![issue(stream, ISSUE_TX_DECODE, err)]));
            }
            Err(err @ DocError::InvalidTx(_)) => {
                return Ok(Err(vec![issue(stream, ISSUE_TX_INVALID, err)]));
            }
            Err(err) => return Ok(Err(vec![issue(stream, ISSUE_CHAIN, err)])),
        };

        let chain = match build_chain(&head_hash, &index) {
            Ok(chain) => chain,
            Err(err) => return Ok(Err(vec![issue(stream, ISSUE_CHAIN, err)])),
        };

        if chain.len() <= opts.threshold {
            return Ok(Ok(Action::Skipped));
        }

        let (doc, head) = match rehydrate(&chain, self.caps.patcher.as_deref(), cancel) {
            Ok(result) => result,
            // Deleted docs need no snapshot.
            Err(DocError::DocDeleted) => return Ok(Ok(Action::Skipped)),
            Err(DocError::Canceled(err)) => return Err(err.into()),
            Err(err) => return Ok(Err(vec![issue(stream, ISSUE_REHYDRATE, err)])),
        };

        let canonical = match self.caps.canon.canonicalize(&doc) {
            Ok(canonical) => canonical,
            Err(err) => return Ok(Err(vec![issue(stream, ISSUE_CANONICALIZE, err)])),
        };

        let tx_id = match self.caps.ids.new_id() {
            Ok(id) => id,
            Err(err) => return Ok(Err(vec![issue(stream, ISSUE_WRITE, err)])),
        };

        let tx = Transaction {
            tx_id,
            timestamp: self.caps.clock.now_nanos(),
            collection: head.tx.collection.clone(),
            doc_id: head.tx.doc_id.clone(),
            op: TxOp::Merge,
            parent_hash: if self.history_mode == HistoryMode::Amend {
                String::new()
            } else {
                head_hash
            },
            schema_version: head.tx.schema_version.clone(),
            snapshot: Some(canonical),
            patch: None,
        };

        let encoded = match encode(&tx) {
            Ok(bytes) => bytes,
            Err(err) => return Ok(Err(vec![issue(stream, ISSUE_WRITE, err)])),
        };
        let tx_hash = self.caps.hasher.sum_hex(&encoded);

        if opts.dry_run {
            return Ok(Ok(Action::Planned));
        }

        // No state-mirror projection here: compaction only rewrites history
        // shape, the mirror still holds the same document.
        let write = TxWrite {
            stream_path: stream.to_string(),
            tx_bytes: encoded,
            tx_hash,
            tx,
            state_path: None,
            state_tx_bytes: None,
            state_tx_hash: None,
        };
        match self.store.put_tx(repo, &write, cancel) {
            Ok(_) => Ok(Ok(Action::Created)),
            Err(StoreError::Canceled(err)) => Err(err.into()),
            Err(err) => Ok(Err(vec![issue(stream, ISSUE_WRITE, err)])),
        }
    }
}

fn issue(stream: &str, code: &'static str, message: impl ToString) -> Issue {
    Issue {
        stream_path: stream.to_string(),
        code,
        message: message.to_string(),
    }
}
