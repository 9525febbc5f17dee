//! Collection descriptors.
//!
//! `collections/<name>/schema.json` plus an optional `indexes.json` of
//! sorted, de-duplicated field names. The JSON Schema engine itself sits
//! behind `SchemaValidator`; this module only enforces syntactic validity.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::is_valid_collection_name;

pub const COLLECTIONS_DIR: &str = "collections";
pub const SCHEMA_FILE: &str = "schema.json";
pub const INDEXES_FILE: &str = "indexes.json";

/// External JSON Schema validation hook.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema: &[u8]) -> Result<(), String>;
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CollectionError {
    #[error("collection is required")]
    CollectionRequired,

    #[error("invalid collection name: {name}")]
    InvalidName { name: String },

    #[error("schema is required")]
    SchemaRequired,

    #[error("schema is not valid JSON")]
    SchemaInvalidJson,

    #[error("schema rejected: {reason}")]
    SchemaRejected { reason: String },

    #[error("collection io at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Apply a collection descriptor: validate the schema bytes, normalize the
/// index list, and write both files.
pub fn apply(
    repo_path: &Path,
    collection: &str,
    schema: &[u8],
    indexes: &[String],
    validator: Option<&dyn SchemaValidator>,
) -> Result<(), CollectionError> {
    let collection = collection.trim();
    if collection.is_empty() {
        return Err(CollectionError::CollectionRequired);
    }
    if !is_valid_collection_name(collection) {
        return Err(CollectionError::InvalidName {
            name: collection.to_string(),
        });
    }

    let schema = trim_bytes(schema);
    if schema.is_empty() {
        return Err(CollectionError::SchemaRequired);
    }
    if serde_json::from_slice::<serde_json::Value>(schema).is_err() {
        return Err(CollectionError::SchemaInvalidJson);
    }
    if let Some(validator) = validator {
        validator
            .validate(schema)
            .map_err(|reason| CollectionError::SchemaRejected { reason })?;
    }

    let indexes = normalize_indexes(indexes);

    let repo = std::path::absolute(repo_path).unwrap_or_else(|_| repo_path.to_path_buf());
    let dir = repo.join(COLLECTIONS_DIR).join(collection);
    std::fs::create_dir_all(&dir).map_err(|source| io_err(&dir, source))?;

    let schema_path = dir.join(SCHEMA_FILE);
    std::fs::write(&schema_path, schema).map_err(|source| io_err(&schema_path, source))?;

    let indexes_path = dir.join(INDEXES_FILE);
    if indexes.is_empty() {
        match std::fs::remove_file(&indexes_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(&indexes_path, err)),
        }
    } else {
        let mut payload = serde_json::to_vec_pretty(&indexes)
            .map_err(|_| CollectionError::SchemaInvalidJson)?;
        payload.push(b'\n');
        std::fs::write(&indexes_path, payload)
            .map_err(|source| io_err(&indexes_path, source))?;
    }

    tracing::debug!(collection = %collection, indexes = indexes.len(), "collection descriptor applied");
    Ok(())
}

/// Trim, drop empties, de-duplicate, sort.
fn normalize_indexes(indexes: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = indexes
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    set.into_iter().collect()
}

fn trim_bytes(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn io_err(path: &Path, source: std::io::Error) -> CollectionError {
    CollectionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_schema_and_sorted_indexes() {
        let dir = TempDir::new().unwrap();
        let indexes = vec![
            "  name ".to_string(),
            "age".to_string(),
            "name".to_string(),
            String::new(),
        ];
        apply(dir.path(), "users", br#"{"type":"object"}"#, &indexes, None).unwrap();

        let schema = std::fs::read(dir.path().join("collections/users/schema.json")).unwrap();
        assert_eq!(schema, br#"{"type":"object"}"#);

        let raw = std::fs::read(dir.path().join("collections/users/indexes.json")).unwrap();
        let parsed: Vec<String> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, vec!["age".to_string(), "name".to_string()]);
    }

    #[test]
    fn empty_indexes_removes_file() {
        let dir = TempDir::new().unwrap();
        apply(
            dir.path(),
            "users",
            b"{}",
            &["name".to_string()],
            None,
        )
        .unwrap();
        assert!(dir.path().join("collections/users/indexes.json").exists());

        apply(dir.path(), "users", b"{}", &[], None).unwrap();
        assert!(!dir.path().join("collections/users/indexes.json").exists());
    }

    #[test]
    fn rejects_bad_inputs() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            apply(dir.path(), "  ", b"{}", &[], None),
            Err(CollectionError::CollectionRequired)
        ));
        assert!(matches!(
            apply(dir.path(), "a/b", b"{}", &[], None),
            Err(CollectionError::InvalidName { .. })
        ));
        assert!(matches!(
            apply(dir.path(), "users", b"  ", &[], None),
            Err(CollectionError::SchemaRequired)
        ));
        assert!(matches!(
            apply(dir.path(), "users", b"{nope", &[], None),
            Err(CollectionError::SchemaInvalidJson)
        ));
    }

    struct RejectAll;

    impl SchemaValidator for RejectAll {
        fn validate(&self, _schema: &[u8]) -> Result<(), String> {
            Err("no schemas today".to_string())
        }
    }

    #[test]
    fn validator_hook_is_consulted() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            apply(dir.path(), "users", b"{}", &[], Some(&RejectAll)),
            Err(CollectionError::SchemaRejected { .. })
        ));
    }
}
