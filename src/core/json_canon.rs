//! Canonical JSON for payloads and hashed artifacts.
//!
//! Canonical rules:
//! - object keys sorted by UTF-8 byte order, recursively
//! - no insignificant whitespace
//! - minimal number form (whatever serde_json emits for the parsed value)
//!
//! The tx engine assumes payloads compare byte-equal after canonicalization;
//! everything that gets hashed goes through here first.

use serde_json::{Map, Value};

use super::error::CanonError;

/// Canonicalize raw JSON bytes.
pub fn canonicalize(input: &[u8]) -> Result<Vec<u8>, CanonError> {
    let value: Value = serde_json::from_slice(input).map_err(CanonError::Parse)?;
    let canon = canon_value(value);
    serde_json::to_vec(&canon).map_err(CanonError::Encode)
}

fn canon_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut canon = Map::new();
            for (key, value) in entries {
                canon.insert(key, canon_value(value));
            }
            Value::Object(canon)
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canon_value).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_keys_recursively() {
        let input = br#"{"b":1,"a":{"d":4,"c":3},"aa":[{"z":1,"y":2}]}"#;
        let bytes = canonicalize(input).unwrap();
        assert_eq!(bytes, br#"{"a":{"c":3,"d":4},"aa":[{"y":2,"z":1}],"b":1}"#);
    }

    #[test]
    fn strips_whitespace() {
        let bytes = canonicalize(b"{ \"a\" : [ 1 , 2 ] }").unwrap();
        assert_eq!(bytes, br#"{"a":[1,2]}"#);
    }

    #[test]
    fn idempotent() {
        let once = canonicalize(br#"{"b":2,"a":1}"#).unwrap();
        let twice = canonicalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(canonicalize(b"true").unwrap(), b"true");
        assert_eq!(canonicalize(b"\"x\"").unwrap(), b"\"x\"");
        assert_eq!(canonicalize(b"42").unwrap(), b"42");
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(canonicalize(b"{"), Err(CanonError::Parse(_))));
        assert!(matches!(canonicalize(b"NaN"), Err(CanonError::Parse(_))));
    }
}
