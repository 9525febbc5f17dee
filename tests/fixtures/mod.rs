//! Shared test fixtures: temp repositories and wired services.
#![allow(dead_code)]

use std::path::PathBuf;

use tempfile::TempDir;

use ledgerdb::core::{Caps, HistoryMode, StreamLayout};
use ledgerdb::repo::{self, InitOptions};
use ledgerdb::Docs;

pub struct TestRepo {
    pub dir: TempDir,
    pub path: PathBuf,
    pub docs: Docs,
    pub caps: Caps,
    pub layout: StreamLayout,
    pub history_mode: HistoryMode,
}

pub fn init_repo(history_mode: HistoryMode) -> TestRepo {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("store");
    let caps = Caps::standard();
    let manifest = repo::init(
        &path,
        InitOptions {
            name: Some("test-store".to_string()),
            stream_layout: Some(StreamLayout::Sharded),
            history_mode: Some(history_mode),
        },
        caps.clock.as_ref(),
    )
    .expect("init repo");

    let docs = Docs::new(caps.clone(), manifest.stream_layout, manifest.history_mode);
    TestRepo {
        dir,
        path,
        docs,
        caps,
        layout: manifest.stream_layout,
        history_mode: manifest.history_mode,
    }
}

pub fn append_repo() -> TestRepo {
    init_repo(HistoryMode::Append)
}

pub fn amend_repo() -> TestRepo {
    init_repo(HistoryMode::Amend)
}
