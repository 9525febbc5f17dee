//! Object-store and stream-store error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::Canceled;
use crate::error::{Effect, Transience};

/// Errors from the git-backed object database and stream store.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("failed to open repository at {0}: {1}")]
    OpenRepo(PathBuf, #[source] git2::Error),

    #[error("failed to init repository at {0}: {1}")]
    InitRepo(PathBuf, #[source] git2::Error),

    #[error("main ref read failed: {0}")]
    ReadRef(#[source] git2::Error),

    #[error("expected blob but got different object type at {path}")]
    NotABlob { path: String },

    #[error("stream tx missing at {path}")]
    StreamTxMissing { path: String },

    #[error("failed to write blob: {0}")]
    WriteBlob(#[source] git2::Error),

    #[error("failed to build tree: {0}")]
    BuildTree(#[source] git2::Error),

    #[error("failed to create commit: {0}")]
    Commit(#[source] git2::Error),

    #[error("stream head changed")]
    HeadChanged,

    #[error("manifest io at {path:?}: {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Manifest(#[from] crate::core::ManifestError),

    #[error(transparent)]
    Canceled(#[from] Canceled),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

impl StoreError {
    /// Whether retrying may succeed.
    pub fn transience(&self) -> Transience {
        match self {
            // CAS contention: the caller may retry against the new head.
            StoreError::HeadChanged => Transience::Retryable,

            StoreError::Canceled(_) => Transience::Unknown,

            StoreError::OpenRepo(_, _)
            | StoreError::InitRepo(_, _)
            | StoreError::ReadRef(_)
            | StoreError::NotABlob { .. }
            | StoreError::StreamTxMissing { .. }
            | StoreError::WriteBlob(_)
            | StoreError::BuildTree(_)
            | StoreError::Commit(_)
            | StoreError::ManifestIo { .. }
            | StoreError::Manifest(_)
            | StoreError::Git(_) => Transience::Permanent,
        }
    }

    /// What we know about side effects when this error is returned.
    pub fn effect(&self) -> Effect {
        match self {
            // HeadChanged surfaces after blobs were inserted but before the
            // ref moved; the objects are unreferenced garbage, nothing
            // observable changed.
            StoreError::HeadChanged => Effect::None,

            // Low-level git errors can happen at any phase.
            StoreError::Git(_) | StoreError::Canceled(_) => Effect::Unknown,

            _ => Effect::None,
        }
    }
}
