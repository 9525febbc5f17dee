//! Domain core: tx model, codec, canonical JSON, hashing, capabilities,
//! cancellation, manifest, and stream path rules.
//!
//! Module order follows type dependency order: hash and json_canon are leaf
//! utilities, tx/codec build on them, caps bundles the injectable seams.

pub mod cancel;
pub mod caps;
pub mod codec;
pub mod error;
pub mod hash;
pub mod json_canon;
pub mod manifest;
pub mod paths;
pub mod tx;

pub use cancel::{Cancel, Canceled};
pub use caps::{
    Canonicalizer, Caps, Clock, Hasher, IdGen, JsonCanonicalizer, JsonPatcher, Patcher,
    Sha256Hasher, SystemClock, UlidGen,
};
pub use codec::{decode, encode, tx_file_name, TX_COMPACT_FILE, TX_FILE_EXT};
pub use error::{CanonError, CoreError, IdError, InvalidTx, MalformedTx, PatchError};
pub use hash::sum_hex;
pub use json_canon::canonicalize;
pub use manifest::{HistoryMode, Manifest, ManifestError, StreamLayout, MANIFEST_FILE};
pub use paths::{
    hds_hash, is_valid_collection_name, state_path, stream_path, DOCUMENTS_ROOT, DOC_DIR_PREFIX,
    STATE_ROOT, STREAM_HEAD_FILE, TX_DIR,
};
pub use tx::{Transaction, TxOp};
