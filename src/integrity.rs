//! Offline integrity verifier.
//!
//! Walks every stream and reports issues without ever modifying the store.

use std::path::Path;

use crate::core::{decode, sum_hex, Cancel, Caps};
use crate::doc::chain::{build_chain, ChainEntry, TxIndex};
use crate::doc::DocError;
use crate::git::{StoreError, StreamStore};

pub const ISSUE_HEAD_READ: &str = "head_read";
pub const ISSUE_HEAD_MISSING: &str = "head_missing";
pub const ISSUE_TX_READ: &str = "tx_read";
pub const ISSUE_TX_MISSING: &str = "tx_missing";
pub const ISSUE_TX_DECODE: &str = "tx_decode";
pub const ISSUE_TX_INVALID: &str = "tx_invalid";
pub const ISSUE_CHAIN: &str = "chain_invalid";
pub const ISSUE_ORPHAN_TX: &str = "orphan_tx";
pub const ISSUE_REHYDRATE: &str = "rehydrate_failed";

#[derive(Clone, Copy, Debug, Default)]
pub struct VerifyOptions {
    /// Also replay every chain end to end.
    pub deep: bool,
}

#[derive(Clone, Debug)]
pub struct Issue {
    pub stream_path: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct VerifyReport {
    pub streams: usize,
    pub valid: usize,
    pub issues: Vec<Issue>,
}

pub struct VerifyService {
    caps: Caps,
    store: StreamStore,
}

impl VerifyService {
    pub fn new(caps: Caps, store: StreamStore) -> Self {
        Self { caps, store }
    }

    pub fn verify(
        &self,
        repo_path: &Path,
        opts: VerifyOptions,
        cancel: &Cancel,
    ) -> Result<VerifyReport, DocError> {
        let repo = std::path::absolute(repo_path).unwrap_or_else(|_| repo_path.to_path_buf());
        let streams = self.store.list_doc_streams(&repo, cancel)?;

        let mut report = VerifyReport {
            streams: streams.len(),
            ..VerifyReport::default()
        };
        for stream in &streams {
            cancel.check()?;
            let issues = self.verify_stream(&repo, stream, opts, cancel)?;
            if issues.is_empty() {
                report.valid += 1;
            } else {
                report.issues.extend(issues);
            }
        }

        tracing::debug!(
            streams = report.streams,
            valid = report.valid,
            issues = report.issues.len(),
            "verify complete"
        );
        Ok(report)
    }

    fn verify_stream(
        &self,
        repo: &Path,
        stream: &str,
        opts: VerifyOptions,
        cancel: &Cancel,
    ) -> Result<Vec<Issue>, DocError> {
        let head_hash = match self.store.load_stream_head(repo, stream, cancel) {
            Ok(Some(hash)) => hash,
            Ok(None) => return Ok(vec![issue(stream, ISSUE_HEAD_MISSING, "HEAD not found")]),
            Err(StoreError::Canceled(err)) => return Err(err.into()),
            Err(err) => return Ok(vec![issue(stream, ISSUE_HEAD_READ, err)]),
        };

        let blobs = match self.store.load_stream_txs(repo, stream, cancel) {
            Ok(blobs) => blobs,
            Err(StoreError::Canceled(err)) => return Err(err.into()),
            Err(err) => return Ok(vec![issue(stream, ISSUE_TX_READ, err)]),
        };
        if blobs.is_empty() {
            return Ok(vec![issue(stream, ISSUE_TX_MISSING, "no tx blobs found")]);
        }

        let mut index = TxIndex::with_capacity(blobs.len());
        for blob in &blobs {
            cancel.check()?;
            let tx = match decode(&blob.bytes) {
                Ok(tx) => tx,
                Err(err) => return Ok(vec![issue(stream, ISSUE_TX_DECODE, err)]),
            };
            if let Err(err) = tx.validate() {
                return Ok(vec![issue(stream, ISSUE_TX_INVALID, err)]);
            }
            let hash = sum_hex(&blob.bytes);
            if index.contains_key(&hash) {
                return Ok(vec![issue(
                    stream,
                    ISSUE_CHAIN,
                    format!("duplicate tx hash {hash}"),
                )]);
            }
            index.insert(hash.clone(), ChainEntry { hash, tx });
        }

        let chain = match build_chain(&head_hash, &index) {
            Ok(chain) => chain,
            Err(err) => return Ok(vec![issue(stream, ISSUE_CHAIN, err)]),
        };

        let mut issues = Vec::new();
        if chain.len() != index.len() {
            issues.push(issue(
                stream,
                ISSUE_ORPHAN_TX,
                format!("{} orphan tx(s)", index.len() - chain.len()),
            ));
        }

        if opts.deep {
            if let Err(err) = self.verify_rehydrate(&chain, cancel)? {
                issues.push(issue(stream, ISSUE_REHYDRATE, err));
            }
        }

        Ok(issues)
    }

    /// Replay tolerant of mid-chain deletes: a DELETE clears the document
    /// instead of aborting, so delete-then-recreate histories verify clean.
    fn verify_rehydrate(
        &self,
        chain: &[ChainEntry],
        cancel: &Cancel,
    ) -> Result<Result<(), String>, DocError> {
        use crate::core::TxOp;

        let patcher = self.caps.patcher.as_deref();
        let mut doc: Option<Vec<u8>> = None;

        for entry in chain.iter().rev() {
            cancel.check()?;
            let tx = &entry.tx;
            let failure = match tx.op {
                TxOp::Put => {
                    doc = tx.snapshot.clone();
                    None
                }
                TxOp::Delete => {
                    doc = None;
                    None
                }
                TxOp::Patch => apply_step(&mut doc, tx.patch.as_deref(), patcher, "patch"),
                TxOp::Merge => {
                    if let Some(snapshot) = &tx.snapshot {
                        doc = Some(snapshot.clone());
                        None
                    } else {
                        apply_step(&mut doc, tx.patch.as_deref(), patcher, "merge patch")
                    }
                }
            };
            if let Some(message) = failure {
                return Ok(Err(message));
            }
        }

        Ok(Ok(()))
    }
}

fn apply_step(
    doc: &mut Option<Vec<u8>>,
    patch: Option<&[u8]>,
    patcher: Option<&dyn crate::core::Patcher>,
    what: &str,
) -> Option<String> {
    let Some(patcher) = patcher else {
        return Some("patcher not configured".to_string());
    };
    let Some(patch) = patch else {
        return Some(format!("{what} without payload"));
    };
    let Some(base) = doc.as_deref() else {
        return Some(format!("{what} without base document"));
    };
    match patcher.apply(base, patch) {
        Ok(updated) => {
            *doc = Some(updated);
            None
        }
        Err(err) => Some(err.to_string()),
    }
}

fn issue(stream: &str, code: &'static str, message: impl ToString) -> Issue {
    Issue {
        stream_path: stream.to_string(),
        code,
        message: message.to_string(),
    }
}
