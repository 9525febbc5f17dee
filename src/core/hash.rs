//! Content hashing for tx blobs and stream paths.

use sha2::{Digest, Sha256};

/// SHA-256 of `data` rendered as 64-char lowercase hex.
pub fn sum_hex(data: &[u8]) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
