//! Version-control references for checkpoints.
//!
//! Every checkpoint records one immutable ref. In a git repository that is
//! `refs/conductor/checkpoints/<id>` pointing at the current HEAD commit;
//! outside one it is a `detached/<id>` marker.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use git2::{ErrorCode, Repository};
use tracing::debug;

use super::CheckpointId;
use crate::error::CheckpointError;

/// Namespace for every checkpoint ref.
pub const CHECKPOINT_REFS_PREFIX: &str = "refs/conductor/checkpoints/";

/// Records the external reference for a checkpoint.
///
/// Called from blocking context while the store's writer lock is held.
pub trait RefRecorder: Send + Sync + Debug {
    /// Create the reference for `id` and return its name. An existing
    /// reference is never moved.
    fn record(&self, id: &CheckpointId) -> Result<String, CheckpointError>;
}

/// Records `detached/<id>` without touching any repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedRefRecorder;

impl RefRecorder for DetachedRefRecorder {
    fn record(&self, id: &CheckpointId) -> Result<String, CheckpointError> {
        Ok(format!("detached/{}", id))
    }
}

/// Creates checkpoint refs in a git repository.
#[derive(Debug, Clone)]
pub struct GitRefRecorder {
    repo_path: PathBuf,
}

impl GitRefRecorder {
    /// # Errors
    /// Returns `CheckpointError::Git` if `repo_path` is not inside a git
    /// repository.
    pub fn new(repo_path: &Path) -> Result<Self, CheckpointError> {
        let repo = Repository::discover(repo_path)?;
        let root = repo
            .workdir()
            .unwrap_or_else(|| repo.path())
            .to_path_buf();
        debug!(path = %root.display(), "Using git repository for checkpoint refs");
        Ok(Self { repo_path: root })
    }

    fn repo(&self) -> Result<Repository, CheckpointError> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    fn full_ref_name(id: &CheckpointId) -> String {
        format!("{}{}", CHECKPOINT_REFS_PREFIX, id)
    }

    /// Commit SHA the checkpoint ref points at, if it exists.
    pub fn resolve(&self, id: &CheckpointId) -> Result<Option<String>, CheckpointError> {
        let repo = self.repo()?;
        let target = match repo.find_reference(&Self::full_ref_name(id)) {
            Ok(reference) => reference.target().map(|oid| oid.to_string()),
            Err(e) if e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(target)
    }

    /// Ids of every checkpoint ref in the repository, sorted.
    pub fn list(&self) -> Result<Vec<String>, CheckpointError> {
        let repo = self.repo()?;
        let mut ids: Vec<String> = repo
            .references_glob(&format!("{}*", CHECKPOINT_REFS_PREFIX))?
            .filter_map(|r| r.ok())
            .filter_map(|r| r.name().map(String::from))
            .filter_map(|name| name.strip_prefix(CHECKPOINT_REFS_PREFIX).map(String::from))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl RefRecorder for GitRefRecorder {
    fn record(&self, id: &CheckpointId) -> Result<String, CheckpointError> {
        let repo = self.repo()?;
        let refname = Self::full_ref_name(id);

        match repo.find_reference(&refname) {
            Ok(_) => return Err(CheckpointError::Exists(refname)),
            Err(e) if e.code() == ErrorCode::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => {
                return Err(CheckpointError::Ref(
                    "repository has no commits to reference".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        let commit = head.peel_to_commit()?;
        repo.reference(
            &refname,
            commit.id(),
            false,
            &format!("conductor: checkpoint {}", id),
        )?;
        debug!(reference = %refname, commit = %commit.id(), "Checkpoint ref created");
        Ok(refname)
    }
}
