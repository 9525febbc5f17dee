//! Index synchronizer errors.

use thiserror::Error;

use crate::core::{Canceled, CanonError, InvalidTx, MalformedTx, PatchError};
use crate::error::{Effect, Transience};
use crate::git::StoreError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IndexError {
    #[error("last indexed commit not found in repo")]
    CommitNotFound,

    #[error("merge commits are not supported")]
    MergeCommitUnsupported,

    #[error("state tree not available")]
    StateUnavailable,

    #[error("document missing for patch: {collection}/{doc_id}")]
    MissingDocument { collection: String, doc_id: String },

    #[error("patch operations not supported")]
    PatchUnsupported,

    #[error("fetch is not configured")]
    FetchUnavailable,

    #[error("collection not initialized: {collection}")]
    CollectionNotInitialized { collection: String },

    #[error("sidecar io error: {0}")]
    SidecarIo(#[source] std::io::Error),

    #[error(transparent)]
    InvalidTx(#[from] InvalidTx),

    #[error(transparent)]
    Malformed(#[from] MalformedTx),

    #[error(transparent)]
    Canon(#[from] CanonError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("sidecar error: {0}")]
    Sidecar(#[from] rusqlite::Error),

    #[error(transparent)]
    Canceled(#[from] Canceled),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

impl IndexError {
    pub fn transience(&self) -> Transience {
        match self {
            // The repo may gain the commit (fetch) or the caller may allow
            // a reset; sqlite contention clears.
            IndexError::CommitNotFound | IndexError::Sidecar(_) => Transience::Retryable,

            IndexError::Canceled(_) => Transience::Unknown,

            IndexError::Store(err) => err.transience(),

            IndexError::MergeCommitUnsupported
            | IndexError::StateUnavailable
            | IndexError::MissingDocument { .. }
            | IndexError::PatchUnsupported
            | IndexError::FetchUnavailable
            | IndexError::CollectionNotInitialized { .. }
            | IndexError::SidecarIo(_)
            | IndexError::InvalidTx(_)
            | IndexError::Malformed(_)
            | IndexError::Canon(_)
            | IndexError::Patch(_)
            | IndexError::Git(_) => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            // Batch failures roll back the open sidecar transaction; prior
            // batches stay durable.
            IndexError::Sidecar(_) | IndexError::Canceled(_) => Effect::Unknown,
            _ => Effect::None,
        }
    }
}
