//!  Branch reference management.
//!
//!  A branch is the only mutable object in a repository. Every writer
//!  races to move the same branch, so the only update offered here is a
//!  compare-and-swap: the branch moves only if it still points at the commit
//!  the writer built on top of.

use git2::Repository;

use crate::host::error::{HostError, HostResult};
use crate::host::types::{BranchName, CommitId};

/// Reads and moves branches of a local repository.
pub struct RefManager;

fn missing_branch(branch: &BranchName) -> HostError {
    HostError::NotFound(format!("branch {}", branch))
}

impl RefManager {
    /// Commit the branch currently points at.
    pub fn resolve_branch(repo: &Repository, branch: &BranchName) -> HostResult<CommitId> {
        let target = match repo.refname_to_id(&branch.as_ref_path()) {
            Ok(oid) => oid,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Err(missing_branch(branch)),
            Err(e) => return Err(HostError::Git(e)),
        };
        // a branch pointing at something other than a commit is as good as absent
        repo.find_commit(target)
            .map(|c| CommitId::new(c.id()))
            .map_err(|_| missing_branch(branch))
    }

    /// Update a branch only if it still points to the expected commit.
    ///
    /// The check and the write happen inside libgit2 against the on-disk
    /// ref, so a second process sharing the repository is caught as well.
    pub fn update_branch_if_unchanged(
        repo: &Repository,
        branch: &BranchName,
        expected: CommitId,
        new_target: CommitId,
    ) -> HostResult<()> {
        let current = Self::resolve_branch(repo, branch)?;

        if current != expected {
            return Err(HostError::NotFastForward {
                branch: branch.to_string(),
            });
        }

        let log_message = format!("update {} to {}", branch, new_target.short());
        match repo.reference_matching(
            &branch.as_ref_path(),
            new_target.raw(),
            true,
            expected.raw(),
            &log_message,
        ) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == git2::ErrorCode::Modified => Err(HostError::NotFastForward {
                branch: branch.to_string(),
            }),
            Err(e) => Err(HostError::Git(e)),
        }
    }
}
