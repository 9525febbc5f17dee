//! Repository lifecycle: init and manifest I/O.
//!
//! The manifest (`db.yaml`) lives beside the object database as a plain
//! file; it is configuration, not content.

use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::core::{Clock, HistoryMode, Manifest, StreamLayout, MANIFEST_FILE};
use crate::git::{Odb, StoreError};

#[derive(Clone, Debug, Default)]
pub struct InitOptions {
    /// Defaults to the repository directory name.
    pub name: Option<String>,
    pub stream_layout: Option<StreamLayout>,
    pub history_mode: Option<HistoryMode>,
}

/// Create a bare repository with a fresh manifest.
pub fn init(path: &Path, opts: InitOptions, clock: &dyn Clock) -> Result<Manifest, StoreError> {
    let path = absolute(path);
    if path.join("HEAD").exists() || path.join(MANIFEST_FILE).exists() {
        return Err(StoreError::InitRepo(
            path,
            git2::Error::from_str("repository already exists"),
        ));
    }

    let name = opts
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "ledger".to_string())
        });

    Odb::init_bare(&path)?;

    let created_at = OffsetDateTime::from_unix_timestamp_nanos(clock.now_nanos() as i128)
        .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH);
    let mut manifest = Manifest::new(name, created_at);
    if let Some(layout) = opts.stream_layout {
        manifest.stream_layout = layout;
    }
    if let Some(mode) = opts.history_mode {
        manifest.history_mode = mode;
    }

    write_manifest(&path, &manifest)?;
    tracing::info!(path = %path.display(), name = %manifest.name, "repository initialized");
    Ok(manifest)
}

/// Load the manifest, defaulting when the file is absent: a repository
/// without `db.yaml` is treated as a version-1 flat/append store.
pub fn load_manifest(path: &Path) -> Result<Manifest, StoreError> {
    let manifest_path = absolute(path).join(MANIFEST_FILE);
    let data = match std::fs::read_to_string(&manifest_path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let mut manifest = Manifest {
                version: 1,
                name: String::new(),
                stream_layout: StreamLayout::Flat,
                history_mode: HistoryMode::Append,
                created_at: None,
            };
            manifest = manifest.with_defaults();
            return Ok(manifest);
        }
        Err(err) => {
            return Err(StoreError::ManifestIo {
                path: manifest_path,
                source: err,
            });
        }
    };
    Ok(Manifest::parse(&data)?)
}

pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<(), StoreError> {
    let manifest_path = absolute(path).join(MANIFEST_FILE);
    std::fs::write(&manifest_path, manifest.render()).map_err(|err| StoreError::ManifestIo {
        path: manifest_path,
        source: err,
    })
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
