//! Content-addressed object store facade.
//!
//! Write-only object insertion (blobs, trees, commits) plus one mutable ref
//! with atomic compare-and-set. CAS retries do NOT live here; the stream
//! store owns the retry loop.

use std::path::Path;

use git2::{ErrorCode, Oid, Repository, Signature, Tree};

use super::error::StoreError;

/// The single mutable ref the engine writes through.
pub const MAIN_REF: &str = "refs/heads/main";

const COMMIT_AUTHOR_NAME: &str = "ledgerdb";
const COMMIT_AUTHOR_EMAIL: &str = "ledgerdb@local";

const FILE_MODE: i32 = 0o100644;
const DIR_MODE: i32 = 0o040000;

/// Outcome of a ref compare-and-set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    Ok,
    RefChanged,
}

/// Handle over one repository's object database.
pub struct Odb {
    repo: Repository,
}

impl Odb {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let repo = Repository::open(path)
            .map_err(|err| StoreError::OpenRepo(path.to_path_buf(), err))?;
        Ok(Self { repo })
    }

    pub fn init_bare(path: &Path) -> Result<Self, StoreError> {
        let repo = Repository::init_bare(path)
            .map_err(|err| StoreError::InitRepo(path.to_path_buf(), err))?;
        Ok(Self { repo })
    }

    pub fn put_blob(&self, data: &[u8]) -> Result<Oid, StoreError> {
        self.repo.blob(data).map_err(StoreError::WriteBlob)
    }

    pub fn read_blob(&self, oid: Oid) -> Result<Vec<u8>, StoreError> {
        let blob = self.repo.find_blob(oid)?;
        Ok(blob.content().to_vec())
    }

    /// Commit `tree` with the fixed engine identity and the current UTC
    /// timestamp. No ref is moved here.
    pub fn put_commit(
        &self,
        tree: Oid,
        parent: Option<Oid>,
        message: &str,
    ) -> Result<Oid, StoreError> {
        let tree = self.repo.find_tree(tree).map_err(StoreError::BuildTree)?;
        let sig = Signature::now(COMMIT_AUTHOR_NAME, COMMIT_AUTHOR_EMAIL)
            .map_err(StoreError::Commit)?;
        let parents = match parent {
            Some(oid) => vec![self.repo.find_commit(oid).map_err(StoreError::Commit)?],
            None => Vec::new(),
        };
        let parent_refs: Vec<_> = parents.iter().collect();
        self.repo
            .commit(None, &sig, &sig, message, &tree, &parent_refs)
            .map_err(StoreError::Commit)
    }

    /// Current target of `name`, or `None` when the ref does not exist yet.
    pub fn get_ref(&self, name: &str) -> Result<Option<Oid>, StoreError> {
        match self.repo.refname_to_id(name) {
            Ok(oid) => Ok(Some(oid)),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(StoreError::ReadRef(err)),
        }
    }

    /// Atomic compare-and-set of `name`. `expected = None` means the ref
    /// must not exist yet.
    pub fn check_and_set_ref(
        &self,
        name: &str,
        expected: Option<Oid>,
        new: Oid,
    ) -> Result<CasOutcome, StoreError> {
        let result = match expected {
            Some(current) => self
                .repo
                .reference_matching(name, new, true, current, "ledgerdb: advance ref")
                .map(|_| ()),
            None => self
                .repo
                .reference(name, new, false, "ledgerdb: create ref")
                .map(|_| ()),
        };
        match result {
            Ok(()) => Ok(CasOutcome::Ok),
            // Modified: the ref moved. Exists: someone else created it.
            // Locked: a concurrent writer holds the ref lock. All three are
            // one lost CAS round.
            Err(err)
                if matches!(
                    err.code(),
                    ErrorCode::Modified | ErrorCode::Exists | ErrorCode::Locked
                ) =>
            {
                Ok(CasOutcome::RefChanged)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Tree of the commit `name` points at, if the ref exists.
    pub fn ref_tree(&self, name: &str) -> Result<Option<(Oid, Tree<'_>)>, StoreError> {
        let Some(commit_oid) = self.get_ref(name)? else {
            return Ok(None);
        };
        let commit = self.repo.find_commit(commit_oid)?;
        let tree = commit.tree()?;
        Ok(Some((commit_oid, tree)))
    }

    /// Read the blob at `path` inside `tree`, or `None` if absent.
    pub fn read_tree_path(&self, tree: &Tree<'_>, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let object = entry.to_object(&self.repo)?;
        match object.into_blob() {
            Ok(blob) => Ok(Some(blob.content().to_vec())),
            Err(_) => Err(StoreError::NotABlob {
                path: path.to_string(),
            }),
        }
    }

    /// Subtree at `path` inside `tree`, or `None` if absent.
    pub fn subtree(&self, tree: &Tree<'_>, path: &str) -> Result<Option<Tree<'_>>, StoreError> {
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if entry.kind() != Some(git2::ObjectType::Tree) {
            return Ok(None);
        }
        Ok(Some(self.repo.find_tree(entry.id())?))
    }

    pub fn find_tree(&self, oid: Oid) -> Result<Tree<'_>, StoreError> {
        Ok(self.repo.find_tree(oid)?)
    }

    /// Produce a new root tree with the blob `oid` upserted at `path`,
    /// re-hashing every enclosing tree. Entries stay canonically sorted
    /// because treebuilder maintains git tree order.
    pub fn upsert_path(
        &self,
        base: Option<Oid>,
        path: &str,
        blob: Oid,
    ) -> Result<Oid, StoreError> {
        let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
        let base_tree = match base {
            Some(oid) => Some(self.repo.find_tree(oid).map_err(StoreError::BuildTree)?),
            None => None,
        };
        self.upsert_parts(base_tree.as_ref(), &parts, blob)
    }

    fn upsert_parts(
        &self,
        base: Option<&Tree<'_>>,
        parts: &[&str],
        blob: Oid,
    ) -> Result<Oid, StoreError> {
        let mut builder = self
            .repo
            .treebuilder(base)
            .map_err(StoreError::BuildTree)?;

        if parts.len() == 1 {
            builder
                .insert(parts[0], blob, FILE_MODE)
                .map_err(StoreError::BuildTree)?;
        } else {
            let child = match base.and_then(|tree| tree.get_name(parts[0])) {
                Some(entry) if entry.kind() == Some(git2::ObjectType::Tree) => {
                    Some(self.repo.find_tree(entry.id()).map_err(StoreError::BuildTree)?)
                }
                _ => None,
            };
            let child_oid = self.upsert_parts(child.as_ref(), &parts[1..], blob)?;
            builder
                .insert(parts[0], child_oid, DIR_MODE)
                .map_err(StoreError::BuildTree)?;
        }

        builder.write().map_err(StoreError::BuildTree)
    }

    pub(crate) fn repo(&self) -> &Repository {
        &self.repo
    }
}
