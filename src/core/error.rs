//! Core capability errors (validation, codec, canonicalization, patching).
//!
//! These are bounded and stable: they represent domain/refusal states, not
//! library implementation details.

use thiserror::Error;

use super::tx::TxOp;
use crate::error::{Effect, Transience};

/// Semantic tx validation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidTx {
    #[error("tx id is required")]
    TxIdRequired,
    #[error("timestamp is required")]
    TimestampRequired,
    #[error("collection is required")]
    CollectionRequired,
    #[error("doc id is required")]
    DocIdRequired,
    #[error("{op} tx is missing its payload")]
    MissingPayload { op: TxOp },
    #[error("{op} tx must not carry a payload")]
    UnexpectedPayload { op: TxOp },
    #[error("multiple payloads provided")]
    MultiplePayloads,
    #[error("{op} payload is not valid JSON")]
    PayloadNotJson { op: TxOp },
}

/// Wire-form decode failure. Decoding does not re-run semantic validation.
#[derive(Debug, Error)]
pub enum MalformedTx {
    #[error("tx wire form is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Canonical JSON failure.
#[derive(Debug, Error)]
pub enum CanonError {
    #[error("canonicalize: input is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("canonicalize: encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// RFC 6902 patch application failure.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch document is not valid JSON: {0}")]
    Doc(#[source] serde_json::Error),
    #[error("patch is not a valid RFC 6902 document: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("patch did not apply: {0}")]
    Apply(#[from] json_patch::PatchError),
    #[error("patched document encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// ID generation failure.
#[derive(Debug, Error)]
#[error("id generation failed: {reason}")]
pub struct IdError {
    pub reason: String,
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
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
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Pure domain/input failures: retrying the same bytes never helps.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}
