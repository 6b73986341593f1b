//!  Commit objects.
//!
//!  Writing a commit here never moves a branch; that is left to
//!  [`RefManager`](super::refs::RefManager) so every branch move is a
//!  compare-and-swap. The only exception is the root commit of a freshly
//!  created repository, which nothing can race with.

use chrono::{DateTime, TimeZone, Utc};
use git2::Repository;

use crate::host::error::{HostError, HostResult};
use crate::host::local::tree::create_initial_tree;
use crate::host::types::{BranchName, CommitId, GitSignature, TreeId};

/// message of the root commit of every local repository
pub const INITIAL_COMMIT_MESSAGE: &str = "Initialize content repository";

/// A commit as read back from a repository.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author: GitSignature,
    pub committed_at: DateTime<Utc>,
}

impl CommitInfo {
    pub fn first_parent(&self) -> Option<CommitId> {
        self.parent_ids.first().copied()
    }
}

/// Load a commit; an unknown id is [`HostError::NotFound`].
pub fn get_commit(repo: &Repository, id: CommitId) -> HostResult<CommitInfo> {
    let commit = repo.find_commit(id.raw()).map_err(|e| match e.code() {
        git2::ErrorCode::NotFound => HostError::NotFound(format!("commit {}", id)),
        _ => HostError::Git(e),
    })?;

    let author = commit.author();
    let committed_at = Utc
        .timestamp_opt(commit.time().seconds(), 0)
        .single()
        .unwrap_or_else(Utc::now);

    Ok(CommitInfo {
        id,
        tree_id: TreeId::new(commit.tree_id()),
        parent_ids: commit.parent_ids().map(CommitId::new).collect(),
        message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
        author: GitSignature::new(
            String::from_utf8_lossy(author.name_bytes()),
            String::from_utf8_lossy(author.email_bytes()),
        ),
        committed_at,
    })
}

/// Write a commit of `tree` on top of `parent` without touching any ref.
pub fn write_commit(
    repo: &Repository,
    tree: TreeId,
    parent: CommitId,
    message: &str,
    signature: &GitSignature,
) -> HostResult<CommitId> {
    commit_object(repo, None, tree, Some(parent), message, signature)
}

/// Create the parentless first commit of a new repository on `branch`.
pub fn create_initial_commit(
    repo: &Repository,
    branch: &BranchName,
    signature: &GitSignature,
) -> HostResult<CommitId> {
    let tree = create_initial_tree(repo)?;
    let refname = branch.as_ref_path();
    commit_object(repo, Some(&refname), tree, None, INITIAL_COMMIT_MESSAGE, signature)
}

fn commit_object(
    repo: &Repository,
    update_ref: Option<&str>,
    tree: TreeId,
    parent: Option<CommitId>,
    message: &str,
    signature: &GitSignature,
) -> HostResult<CommitId> {
    let tree = repo.find_tree(tree.raw())?;
    let sig = signature.to_git2_signature()?;
    let parent = parent.map(|p| repo.find_commit(p.raw())).transpose()?;
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    let oid = repo.commit(update_ref, &sig, &sig, message, &tree, &parents)?;
    Ok(CommitId::new(oid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::local::refs::RefManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository, CommitId) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        let root = create_initial_commit(&repo, &BranchName::main(), &GitSignature::gitstore()).unwrap();
        (dir, repo, root)
    }

    #[test]
    fn initial_commit_points_branch_at_root() {
        let (_dir, repo, root) = setup();

        assert_eq!(RefManager::resolve_branch(&repo, &BranchName::main()).unwrap(), root);
        let info = get_commit(&repo, root).unwrap();
        assert!(info.parent_ids.is_empty());
        assert_eq!(info.author, GitSignature::gitstore());
        assert_eq!(info.message, INITIAL_COMMIT_MESSAGE);
    }

    #[test]
    fn write_commit_leaves_branch_alone() {
        let (_dir, repo, root) = setup();
        let tree = get_commit(&repo, root).unwrap().tree_id;
        let bot = GitSignature::new("Course Bot", "bot@school.test");

        let child = write_commit(&repo, tree, root, "Update pages", &bot).unwrap();

        let info = get_commit(&repo, child).unwrap();
        assert_eq!(info.first_parent(), Some(root));
        assert_eq!(info.author, bot);
        assert_eq!(info.tree_id, tree);
        assert_eq!(RefManager::resolve_branch(&repo, &BranchName::main()).unwrap(), root);
    }

    #[test]
    fn unknown_commit_is_not_found() {
        let (_dir, repo, _) = setup();
        let missing = CommitId::from_hex("ce013625030ba8dba906f756967f9e9ca394464a").unwrap();
        assert!(matches!(get_commit(&repo, missing), Err(HostError::NotFound(_))));
    }
}
