//! host layer for gitstore
//!
//! this module abstracts the place where repositories actually live. The
//! content store above it only ever talks to [`VersionControlHost`], a small
//! set of git primitives plus the single-file "contents" convenience
//! endpoints most forges offer.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ContentStore                            │
//! │  (reads, cache, single writes, atomic batches, retry)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                 ┌─────────────────────────┐
//!                 │   VersionControlHost    │
//!                 └─────────────────────────┘
//!                     │                 │
//!                     ▼                 ▼
//!             ┌─────────────┐     ┌─────────────┐
//!             │  LocalHost  │     │ GitHubHost  │
//!             │   (git2)    │     │  (reqwest)  │
//!             └─────────────┘     └─────────────┘
//! ```

mod error;
pub mod github;
pub mod local;
pub mod rate_limit;
mod types;

use async_trait::async_trait;

pub use error::{HostError, HostResult};
pub use github::GitHubHost;
pub use local::LocalHost;
pub use types::{
    join_path, normalize_path, parent_path, BlobId, BranchName, CommitId, Contents,
    EntryKind, FileWrite, GitSignature, InvalidNameError, ObjectId, Provider, RemoteEntry,
    RemoteFile, RepositoryIdentity, TreeChange, TreeId,
};

/// The primitives a repository host has to offer.
///
/// The blob/tree/commit/branch methods are the minimal, stable subset the
/// atomic batch path is built on. `update_branch` is the one contended
/// operation: it must fail with [`HostError::NotFastForward`] when the branch
/// no longer points at `expected`.
#[async_trait]
pub trait VersionControlHost: Send + Sync {
    /// which provider this host serves
    fn provider(&self) -> Provider;

    /// public URL a browser can fetch `path` from
    fn content_url(&self, repo: &RepositoryIdentity, branch: &BranchName, path: &str) -> String;

    /// read a file or directory at the branch tip; `Ok(None)` on 404
    async fn get_contents(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        path: &str,
    ) -> HostResult<Option<Contents>>;

    /// create or replace a single file in its own commit.
    ///
    /// `prior` must be the current blob hash when the file exists.
    async fn put_file(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        path: &str,
        content: &[u8],
        prior: Option<BlobId>,
        message: &str,
    ) -> HostResult<FileWrite>;

    /// delete a single file in its own commit
    async fn delete_file(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        path: &str,
        prior: BlobId,
        message: &str,
    ) -> HostResult<CommitId>;

    /// store a content-addressed blob (idempotent)
    async fn create_blob(&self, repo: &RepositoryIdentity, content: &[u8]) -> HostResult<BlobId>;

    /// read a blob's bytes; no size ceiling
    async fn get_blob(&self, repo: &RepositoryIdentity, blob: BlobId) -> HostResult<Vec<u8>>;

    /// current head commit of a branch
    async fn get_branch_head(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
    ) -> HostResult<CommitId>;

    /// root tree of a commit
    async fn get_commit_tree(&self, repo: &RepositoryIdentity, commit: CommitId)
        -> HostResult<TreeId>;

    /// write a new tree = `base` + `changes`
    async fn create_tree(
        &self,
        repo: &RepositoryIdentity,
        base: TreeId,
        changes: &[TreeChange],
    ) -> HostResult<TreeId>;

    /// write a commit object without moving any branch
    async fn create_commit(
        &self,
        repo: &RepositoryIdentity,
        tree: TreeId,
        parent: CommitId,
        message: &str,
    ) -> HostResult<CommitId>;

    /// compare-and-swap the branch from `expected` to `new`
    async fn update_branch(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        expected: CommitId,
        new: CommitId,
    ) -> HostResult<()>;
}
