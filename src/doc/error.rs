//! Document service errors.

use thiserror::Error;

use crate::core::{Canceled, CanonError, IdError, InvalidTx, MalformedTx, PatchError};
use crate::error::{Effect, Transience};
use crate::git::StoreError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DocError {
    #[error("collection is required")]
    CollectionRequired,

    #[error("invalid collection name: {name}")]
    InvalidCollection { name: String },

    #[error("doc id is required")]
    DocIdRequired,

    #[error("payload is required")]
    PayloadRequired,

    #[error("document not found")]
    DocNotFound,

    #[error("document deleted")]
    DocDeleted,

    #[error("patch operations not supported")]
    PatchUnsupported,

    #[error("tx id or tx hash is required")]
    TxReferenceRequired,

    #[error("tx id and tx hash cannot be used together")]
    TxReferenceAmbiguous,

    #[error("transaction not found")]
    TxNotFound,

    #[error("stream head changed")]
    HeadChanged,

    #[error("duplicate tx hash {hash}")]
    DuplicateTx { hash: String },

    #[error("cycle detected at {hash}")]
    ChainCycle { hash: String },

    #[error("missing tx {hash}")]
    MissingTx { hash: String },

    #[error(transparent)]
    InvalidTx(#[from] InvalidTx),

    #[error(transparent)]
    Malformed(#[from] MalformedTx),

    #[error(transparent)]
    Canon(#[from] CanonError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error(transparent)]
    Canceled(#[from] Canceled),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for DocError {
    fn from(err: StoreError) -> Self {
        match err {
            // The write path's conflict signal is part of the service
            // contract, not a store internal.
            StoreError::HeadChanged => DocError::HeadChanged,
            StoreError::Canceled(canceled) => DocError::Canceled(canceled),
            other => DocError::Store(other),
        }
    }
}

impl DocError {
    pub fn transience(&self) -> Transience {
        match self {
            DocError::HeadChanged => Transience::Retryable,
            DocError::Canceled(_) => Transience::Unknown,
            DocError::Store(err) => err.transience(),
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            // Reads and validation fail without durable writes; HeadChanged
            // leaves only unreferenced objects behind.
            DocError::Store(err) => err.effect(),
            DocError::Canceled(_) => Effect::Unknown,
            _ => Effect::None,
        }
    }
}
