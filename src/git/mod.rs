//! Git-backed persistence: object store facade, stream store, and the log
//! source consumed by the index synchronizer.

pub mod error;
pub mod odb;
pub mod source;
pub mod stream;

pub use error::StoreError;
pub use odb::{CasOutcome, Odb, MAIN_REF};
pub use source::GitCommitSource;
pub use stream::{PutOutcome, StreamStore, TxBlob, TxWrite};
