//! Log source for the index synchronizer.
//!
//! Extracts tx blobs out of commits (tree-diff against the single parent)
//! and out of the state mirror (diff between state subtree snapshots).

use std::path::Path;

use git2::{Delta, Oid, Tree};

use super::odb::{Odb, MAIN_REF};
use super::stream::TxBlob;
use crate::core::{Cancel, DOCUMENTS_ROOT, STATE_ROOT, TX_DIR, TX_FILE_EXT};
use crate::index::{CommitSource, IndexError, StateTxs, SyncState};

/// Production `CommitSource` over the git object database.
#[derive(Clone, Copy, Debug, Default)]
pub struct GitCommitSource;

impl GitCommitSource {
    pub fn new() -> Self {
        Self
    }

    fn commit_txs_for_root(
        &self,
        repo_path: &Path,
        commit_hash: &str,
        root: &str,
        cancel: &Cancel,
    ) -> Result<Vec<TxBlob>, IndexError> {
        cancel.check()?;
        let odb = Odb::open(repo_path).map_err(IndexError::Store)?;
        let repo = odb.repo();

        let oid = Oid::from_str(commit_hash)?;
        let commit = repo.find_commit(oid)?;
        if commit.parent_count() > 1 {
            return Err(IndexError::MergeCommitUnsupported);
        }

        let tree = commit.tree()?;
        if commit.parent_count() == 0 {
            return list_txs_in_tree(&odb, &tree, "", Some(root), cancel);
        }

        let parent_tree = commit.parent(0)?.tree()?;
        let diff = repo.diff_tree_to_tree(Some(&parent_tree), Some(&tree), None)?;

        let mut txs = Vec::new();
        for delta in diff.deltas() {
            cancel.check()?;
            if delta.status() == Delta::Deleted {
                continue;
            }
            let Some(path) = delta.new_file().path() else {
                continue;
            };
            let path = path.to_string_lossy().into_owned();
            if !is_tx_path_for_root(&path, root) {
                continue;
            }
            let bytes = odb.read_blob(delta.new_file().id()).map_err(IndexError::Store)?;
            txs.push(TxBlob { path, bytes });
        }
        Ok(txs)
    }
}

impl CommitSource for GitCommitSource {
    /// Commit hashes reachable from main since `since` (exclusive),
    /// oldest-first. `CommitNotFound` when `since` is not reachable.
    fn list_commit_hashes(
        &self,
        repo_path: &Path,
        since: &str,
        cancel: &Cancel,
    ) -> Result<Vec<String>, IndexError> {
        cancel.check()?;
        let odb = Odb::open(repo_path).map_err(IndexError::Store)?;
        let Some(head) = odb.get_ref(MAIN_REF).map_err(IndexError::Store)? else {
            return Ok(Vec::new());
        };

        let repo = odb.repo();
        let mut revwalk = repo.revwalk()?;
        revwalk.push(head)?;

        let mut commits = Vec::new();
        let mut found = since.is_empty();
        for oid in revwalk {
            cancel.check()?;
            let oid = oid?;
            if !since.is_empty() && oid.to_string() == since {
                found = true;
                break;
            }
            commits.push(oid.to_string());
        }
        if !found {
            return Err(IndexError::CommitNotFound);
        }

        commits.reverse();
        Ok(commits)
    }

    fn commit_txs(
        &self,
        repo_path: &Path,
        commit_hash: &str,
        cancel: &Cancel,
    ) -> Result<Vec<TxBlob>, IndexError> {
        self.commit_txs_for_root(repo_path, commit_hash, DOCUMENTS_ROOT, cancel)
    }

    fn commit_state_txs(
        &self,
        repo_path: &Path,
        commit_hash: &str,
        cancel: &Cancel,
    ) -> Result<Vec<TxBlob>, IndexError> {
        self.commit_txs_for_root(repo_path, commit_hash, STATE_ROOT, cancel)
    }

    /// State-mirror txs that changed since the recorded sidecar state,
    /// computed by diffing state subtree snapshots.
    fn state_txs_since(
        &self,
        repo_path: &Path,
        state: &SyncState,
        cancel: &Cancel,
    ) -> Result<StateTxs, IndexError> {
        cancel.check()?;
        let odb = Odb::open(repo_path).map_err(IndexError::Store)?;
        let repo = odb.repo();

        let Some((head_commit, head_tree)) = odb.ref_tree(MAIN_REF).map_err(IndexError::Store)?
        else {
            return Ok(StateTxs::default());
        };
        let Some(state_tree) = odb.subtree(&head_tree, STATE_ROOT).map_err(IndexError::Store)?
        else {
            return Err(IndexError::StateUnavailable);
        };

        let mut result = StateTxs {
            head_hash: head_commit.to_string(),
            state_hash: state_tree.id().to_string(),
            txs: Vec::new(),
        };

        // Fresh sidecar: everything in the state subtree applies.
        if state.last_commit.is_empty() && state.last_state_tree.is_empty() {
            result.txs = list_txs_in_tree(&odb, &state_tree, STATE_ROOT, None, cancel)?;
            return Ok(result);
        }
        if !state.last_state_tree.is_empty() && state.last_state_tree == result.state_hash {
            return Ok(result);
        }

        let mut since_tree: Option<Tree<'_>> = None;
        if !state.last_state_tree.is_empty() {
            if let Ok(oid) = Oid::from_str(&state.last_state_tree) {
                match repo.find_tree(oid) {
                    Ok(tree) => since_tree = Some(tree),
                    Err(err) if err.code() == git2::ErrorCode::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        if since_tree.is_none() && !state.last_commit.is_empty() {
            let oid = Oid::from_str(&state.last_commit)
                .map_err(|_| IndexError::CommitNotFound)?;
            let since_commit = match repo.find_commit(oid) {
                Ok(commit) => commit,
                Err(err) if err.code() == git2::ErrorCode::NotFound => {
                    return Err(IndexError::CommitNotFound);
                }
                Err(err) => return Err(err.into()),
            };
            let since_root = since_commit.tree()?;
            match odb.subtree(&since_root, STATE_ROOT).map_err(IndexError::Store)? {
                Some(tree) => since_tree = Some(tree),
                None => {
                    // The previous sync point predates the state mirror.
                    result.txs =
                        list_txs_in_tree(&odb, &state_tree, STATE_ROOT, None, cancel)?;
                    return Ok(result);
                }
            }
        }

        let Some(since_tree) = since_tree else {
            result.txs = list_txs_in_tree(&odb, &state_tree, STATE_ROOT, None, cancel)?;
            return Ok(result);
        };

        let diff = repo.diff_tree_to_tree(Some(&since_tree), Some(&state_tree), None)?;
        for delta in diff.deltas() {
            cancel.check()?;
            if delta.status() == Delta::Deleted {
                continue;
            }
            let Some(path) = delta.new_file().path() else {
                continue;
            };
            let rel = path.to_string_lossy().into_owned();
            if !is_tx_path(&rel) {
                continue;
            }
            let bytes = odb.read_blob(delta.new_file().id()).map_err(IndexError::Store)?;
            result.txs.push(TxBlob {
                path: format!("{STATE_ROOT}/{rel}"),
                bytes,
            });
        }

        Ok(result)
    }
}

/// Collect every tx blob in `tree`. `prefix` is prepended to emitted paths;
/// `root_filter` keeps only paths under that top-level directory.
fn list_txs_in_tree(
    odb: &Odb,
    tree: &Tree<'_>,
    prefix: &str,
    root_filter: Option<&str>,
    cancel: &Cancel,
) -> Result<Vec<TxBlob>, IndexError> {
    let mut txs = Vec::new();
    let mut walk_err: Option<IndexError> = None;

    let walk_result = tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
        if cancel.is_canceled() {
            walk_err = Some(IndexError::Canceled(crate::core::Canceled));
            return git2::TreeWalkResult::Abort;
        }
        if entry.kind() != Some(git2::ObjectType::Blob) {
            return git2::TreeWalkResult::Ok;
        }
        let Some(name) = entry.name() else {
            return git2::TreeWalkResult::Ok;
        };
        let rel = format!("{dir}{name}");
        let full = if prefix.is_empty() {
            rel
        } else {
            format!("{prefix}/{rel}")
        };
        let in_root = match root_filter {
            Some(root) => full.starts_with(&format!("{root}/")),
            None => true,
        };
        if !in_root || !is_tx_path(&full) {
            return git2::TreeWalkResult::Ok;
        }
        match odb.read_blob(entry.id()) {
            Ok(bytes) => {
                txs.push(TxBlob { path: full, bytes });
                git2::TreeWalkResult::Ok
            }
            Err(err) => {
                walk_err = Some(IndexError::Store(err));
                git2::TreeWalkResult::Abort
            }
        }
    });

    // An aborted walk surfaces the recorded error, not git2's abort code.
    if let Some(err) = walk_err {
        return Err(err);
    }
    walk_result?;
    Ok(txs)
}

fn is_tx_path(path: &str) -> bool {
    path.contains(&format!("/{TX_DIR}/")) && path.ends_with(TX_FILE_EXT)
}

fn is_tx_path_for_root(path: &str, root: &str) -> bool {
    path.starts_with(&format!("{root}/")) && is_tx_path(path)
}
