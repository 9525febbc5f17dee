#![forbid(unsafe_code)]

pub mod collection;
pub mod core;
pub mod doc;
pub mod error;
pub mod git;
pub mod index;
pub mod integrity;
pub mod maintenance;
pub mod repo;
pub mod telemetry;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the types most callers touch at the crate root.
pub use crate::core::{
    sum_hex, Cancel, Canceled, Canonicalizer, Caps, Clock, CoreError, HistoryMode, IdGen,
    Manifest, Patcher, StreamLayout, Transaction, TxOp,
};
pub use crate::doc::{DocError, Docs, GetResult, LogEntry, PutReceipt, RevertTarget};
pub use crate::git::{StoreError, StreamStore, TxBlob};
pub use crate::index::{SyncMode, SyncOptions, SyncReport, SyncService};
pub use crate::integrity::{VerifyOptions, VerifyReport, VerifyService};
pub use crate::maintenance::{SnapshotOptions, SnapshotReport, SnapshotService};
