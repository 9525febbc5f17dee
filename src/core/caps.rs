//! Injected capabilities shared by every service.
//!
//! Services hold immutable handles; swapping an implementation (fixed clock,
//! scripted id source) is how tests make writes deterministic.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use super::error::{CanonError, IdError, PatchError};
use super::hash::sum_hex;
use super::json_canon::canonicalize;

/// Wall clock in nanoseconds since epoch UTC.
pub trait Clock: Send + Sync {
    fn now_nanos(&self) -> i64;
}

/// Monotonic, lexicographically sortable tx id source.
pub trait IdGen: Send + Sync {
    fn new_id(&self) -> Result<String, IdError>;
}

/// Content hashing (64-char lowercase hex).
pub trait Hasher: Send + Sync {
    fn sum_hex(&self, data: &[u8]) -> String;
}

/// Canonical JSON normalization.
pub trait Canonicalizer: Send + Sync {
    fn canonicalize(&self, input: &[u8]) -> Result<Vec<u8>, CanonError>;
}

/// RFC 6902 patch application.
pub trait Patcher: Send + Sync {
    fn apply(&self, doc: &[u8], patch: &[u8]) -> Result<Vec<u8>, PatchError>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default()
    }
}

/// ULID generator with per-process monotonicity.
pub struct UlidGen {
    inner: Mutex<ulid::Generator>,
}

impl UlidGen {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ulid::Generator::new()),
        }
    }
}

impl Default for UlidGen {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGen for UlidGen {
    fn new_id(&self) -> Result<String, IdError> {
        let mut generator = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let id = generator.generate().map_err(|err| IdError {
            reason: err.to_string(),
        })?;
        Ok(id.to_string())
    }
}

pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn sum_hex(&self, data: &[u8]) -> String {
        sum_hex(data)
    }
}

pub struct JsonCanonicalizer;

impl Canonicalizer for JsonCanonicalizer {
    fn canonicalize(&self, input: &[u8]) -> Result<Vec<u8>, CanonError> {
        canonicalize(input)
    }
}

pub struct JsonPatcher;

impl Patcher for JsonPatcher {
    fn apply(&self, doc: &[u8], patch: &[u8]) -> Result<Vec<u8>, PatchError> {
        let mut value: Value = serde_json::from_slice(doc).map_err(PatchError::Doc)?;
        let ops: json_patch::Patch =
            serde_json::from_slice(patch).map_err(PatchError::Decode)?;
        json_patch::patch(&mut value, &ops)?;
        serde_json::to_vec(&value).map_err(PatchError::Encode)
    }
}

/// The capability bundle every service is built from.
#[derive(Clone)]
pub struct Caps {
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGen>,
    pub hasher: Arc<dyn Hasher>,
    pub canon: Arc<dyn Canonicalizer>,
    pub patcher: Option<Arc<dyn Patcher>>,
}

impl Caps {
    /// Production wiring: system clock, monotonic ULIDs, SHA-256, canonical
    /// JSON, RFC 6902 patching.
    pub fn standard() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGen::new()),
            hasher: Arc::new(Sha256Hasher),
            canon: Arc::new(JsonCanonicalizer),
            patcher: Some(Arc::new(JsonPatcher)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulids_are_monotonic_and_sortable() {
        let ids = UlidGen::new();
        let a = ids.new_id().unwrap();
        let b = ids.new_id().unwrap();
        assert_eq!(a.len(), 26);
        assert!(a < b);
    }

    #[test]
    fn system_clock_is_nonzero() {
        assert!(SystemClock.now_nanos() > 0);
    }

    #[test]
    fn patcher_applies_rfc6902() {
        let doc = br#"{"a":1}"#;
        let patch = br#"[{"op":"replace","path":"/a","value":2}]"#;
        let out = JsonPatcher.apply(doc, patch).unwrap();
        assert_eq!(out, br#"{"a":2}"#);
    }

    #[test]
    fn patcher_rejects_bad_paths() {
        let doc = br#"{"a":1}"#;
        let patch = br#"[{"op":"replace","path":"/missing","value":2}]"#;
        assert!(matches!(
            JsonPatcher.apply(doc, patch),
            Err(PatchError::Apply(_))
        ));
    }
}
