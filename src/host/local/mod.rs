//!   Filesystem-backed repository host.
//!
//!  [`LocalHost`] keeps one bare git repository per content repository under
//!  a root directory (`{root}/{login}/{repo}.git`) and serves the
//!  [`VersionControlHost`] primitives straight from `git2`. It mirrors the
//!  observable behavior of a remote forge closely enough to stand in for one:
//!  repositories appear on first use with an initial commit, large files are
//!  left out of the inline contents payload, single-file writes demand the
//!  prior hash and branch updates are compare-and-swap.

mod blob;
mod commit;
mod refs;
mod tree;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use git2::{Repository, RepositoryInitOptions};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::host::error::{HostError, HostResult};
use crate::host::types::{
    BlobId, BranchName, CommitId, Contents, FileWrite, GitSignature, Provider, RemoteFile,
    RepositoryIdentity, TreeChange, TreeId,
};
use crate::host::VersionControlHost;

pub use blob::{encode_for_transfer, BlobMetadata};
pub use commit::CommitInfo;
use refs::RefManager;
use tree::PathEntry;

/// Options for a [`LocalHost`].
#[derive(Debug, Clone)]
pub struct LocalHostOptions {
    /// branch created in new repositories
    pub initial_branch: BranchName,
    /// author/committer of every commit
    pub signature: GitSignature,
    /// files above this size are returned without inline content
    pub inline_limit: u64,
}

impl LocalHostOptions {
    /// Matches the inline ceiling of the GitHub contents endpoint.
    pub const DEFAULT_INLINE_LIMIT: u64 = 1024 * 1024;
}

impl Default for LocalHostOptions {
    fn default() -> Self {
        Self {
            initial_branch: BranchName::main(),
            signature: GitSignature::gitstore(),
            inline_limit: Self::DEFAULT_INLINE_LIMIT,
        }
    }
}

/// Host serving bare repositories from the local filesystem.
///
/// Clone this to share across tasks - it uses Arc internally.
#[derive(Clone)]
pub struct LocalHost {
    inner: Arc<LocalHostInner>,
}

struct LocalHostInner {
    root: PathBuf,
    options: LocalHostOptions,
    /// opened repositories, keyed by (login, repo)
    repos: Mutex<HashMap<(String, String), Arc<Mutex<Repository>>>>,
}

impl LocalHost {
    /// Serve repositories below `root` with default options.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_options(root, LocalHostOptions::default())
    }

    pub fn with_options(root: impl AsRef<Path>, options: LocalHostOptions) -> Self {
        Self {
            inner: Arc::new(LocalHostInner {
                root: root.as_ref().to_path_buf(),
                options,
                repos: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// On-disk location of a repository.
    pub fn repo_path(&self, repo: &RepositoryIdentity) -> PathBuf {
        self.inner
            .root
            .join(&repo.login)
            .join(format!("{}.git", repo.repo_namespace))
    }

    /// Open (or create) the repository and hand out its shared handle.
    fn handle(&self, repo: &RepositoryIdentity) -> HostResult<Arc<Mutex<Repository>>> {
        validate_segment(&repo.login)?;
        validate_segment(&repo.repo_namespace)?;

        let key = (repo.login.clone(), repo.repo_namespace.clone());
        let mut repos = self.inner.repos.lock();
        if let Some(handle) = repos.get(&key) {
            return Ok(Arc::clone(handle));
        }

        let path = self.repo_path(repo);
        let git_repo = if path.exists() {
            Repository::open_bare(&path)?
        } else {
            self.init_repository(&path)?
        };

        let handle = Arc::new(Mutex::new(git_repo));
        repos.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    fn init_repository(&self, path: &Path) -> HostResult<Repository> {
        let options = &self.inner.options;
        std::fs::create_dir_all(path)?;

        let mut init = RepositoryInitOptions::new();
        init.bare(true)
            .initial_head(options.initial_branch.as_str())
            .mkpath(true);
        let repo = Repository::init_opts(path, &init)?;

        let root = commit::create_initial_commit(&repo, &options.initial_branch, &options.signature)?;
        info!(path = %path.display(), commit = %root.short(), "initialised local repository");
        Ok(repo)
    }

    /// Run `f` with exclusive access to the repository on the calling thread.
    fn lock_repo<F, T>(&self, repo: &RepositoryIdentity, f: F) -> HostResult<T>
    where
        F: FnOnce(&Repository) -> HostResult<T>,
    {
        let handle = self.handle(repo)?;
        let git_repo = handle.lock();
        f(&git_repo)
    }

    /// Run `f` with exclusive access to the repository on tokio's blocking
    /// pool, keeping git2 I/O off the async workers.
    async fn with_repo<F, T>(&self, repo: &RepositoryIdentity, f: F) -> HostResult<T>
    where
        F: FnOnce(&Repository) -> HostResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let host = self.clone();
        let repo = repo.clone();
        tokio::task::spawn_blocking(move || host.lock_repo(&repo, f))
            .await
            .map_err(|e| HostError::Internal(format!("repository task failed: {}", e)))?
    }

    /// Full commit information, for inspection and tests.
    pub fn commit_info(&self, repo: &RepositoryIdentity, commit: CommitId) -> HostResult<CommitInfo> {
        self.lock_repo(repo, |r| commit::get_commit(r, commit))
    }
}

/// Commit `changes` on top of the branch tip and move the branch.
fn commit_on_branch(
    repo: &Repository,
    branch: &BranchName,
    head: CommitId,
    changes: &[TreeChange],
    message: &str,
    signature: &GitSignature,
) -> HostResult<CommitId> {
    let base = repo.find_commit(head.raw())?.tree()?;
    let new_tree = tree::apply_changes(repo, &base, changes)?;
    let new_commit = commit::write_commit(repo, new_tree, head, message, signature)?;
    RefManager::update_branch_if_unchanged(repo, branch, head, new_commit)?;
    Ok(new_commit)
}

/// login and repository names become directory names
fn validate_segment(segment: &str) -> HostResult<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('\0')
    {
        return Err(HostError::NotFound(format!("repository '{}'", segment)));
    }
    Ok(())
}

/// `Ok(None)` for a missing branch or path, like a 404 from a forge
fn lookup_at_branch(
    repo: &Repository,
    branch: &BranchName,
    path: &str,
) -> HostResult<Option<(CommitId, PathEntry)>> {
    let head = match RefManager::resolve_branch(repo, branch) {
        Ok(head) => head,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };
    let tree = repo.find_commit(head.raw())?.tree()?;
    Ok(tree::lookup(&tree, path)?.map(|entry| (head, entry)))
}

#[async_trait]
impl VersionControlHost for LocalHost {
    fn provider(&self) -> Provider {
        Provider::Local
    }

    fn content_url(&self, repo: &RepositoryIdentity, branch: &BranchName, path: &str) -> String {
        format!("file://{}#{}:{}", self.repo_path(repo).display(), branch, path)
    }

    async fn get_contents(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        path: &str,
    ) -> HostResult<Option<Contents>> {
        let inline_limit = self.inner.options.inline_limit;
        let (target, wanted) = (branch.clone(), path.to_string());
        let contents = self
            .with_repo(repo, move |r| {
                let found = match lookup_at_branch(r, &target, &wanted)? {
                    None => None,
                    Some((_, PathEntry::Blob(id))) => {
                        let blob = r.find_blob(id.raw())?;
                        let meta = BlobMetadata::from_blob(&blob);
                        let encoded = (meta.size <= inline_limit)
                            .then(|| encode_for_transfer(blob.content()));
                        Some(Contents::File(RemoteFile {
                            sha: meta.id,
                            size: meta.size,
                            encoded,
                        }))
                    }
                    Some((_, PathEntry::Tree(id))) => {
                        Some(Contents::Directory(tree::list_entries(r, id, &wanted)?))
                    }
                };
                Ok(found)
            })
            .await?;
        debug!(repo = %repo, path, found = contents.is_some(), "local contents lookup");
        Ok(contents)
    }

    async fn put_file(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        path: &str,
        content: &[u8],
        prior: Option<BlobId>,
        message: &str,
    ) -> HostResult<FileWrite> {
        let (branch, path) = (branch.clone(), path.to_string());
        let (content, message) = (content.to_vec(), message.to_string());
        let signature = self.inner.options.signature.clone();
        self.with_repo(repo, move |r| {
            let head = RefManager::resolve_branch(r, &branch)?;
            let base = r.find_commit(head.raw())?.tree()?;

            match (tree::lookup(&base, &path)?, prior) {
                (Some(PathEntry::Blob(current)), Some(expected)) if current == expected => {}
                (Some(PathEntry::Blob(_)), _) => {
                    return Err(HostError::StaleContent {
                        path: path.to_string(),
                    })
                }
                (Some(PathEntry::Tree(_)), _) => {
                    return Err(HostError::Status {
                        status: 422,
                        message: format!("{} is a directory", path),
                    })
                }
                (None, _) => {}
            }

            let blob = blob::write_blob(r, &content)?;
            let changes = [TreeChange::upsert(path.as_str(), blob)];
            let commit = commit_on_branch(r, &branch, head, &changes, &message, &signature)?;
            Ok(FileWrite { blob, commit })
        })
        .await
    }

    async fn delete_file(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        path: &str,
        prior: BlobId,
        message: &str,
    ) -> HostResult<CommitId> {
        let (branch, path, message) = (branch.clone(), path.to_string(), message.to_string());
        let signature = self.inner.options.signature.clone();
        self.with_repo(repo, move |r| {
            let head = RefManager::resolve_branch(r, &branch)?;
            let base = r.find_commit(head.raw())?.tree()?;

            match tree::lookup(&base, &path)? {
                Some(PathEntry::Blob(current)) if current == prior => {}
                Some(PathEntry::Blob(_)) => {
                    return Err(HostError::StaleContent {
                        path: path.to_string(),
                    })
                }
                _ => return Err(HostError::NotFound(path)),
            }

            let changes = [TreeChange::delete(path.as_str())];
            commit_on_branch(r, &branch, head, &changes, &message, &signature)
        })
        .await
    }

    async fn create_blob(&self, repo: &RepositoryIdentity, content: &[u8]) -> HostResult<BlobId> {
        let content = content.to_vec();
        self.with_repo(repo, move |r| blob::write_blob(r, &content)).await
    }

    async fn get_blob(&self, repo: &RepositoryIdentity, blob: BlobId) -> HostResult<Vec<u8>> {
        self.with_repo(repo, move |r| {
            blob::read_blob(r, blob).map_err(|e| match e {
                e if e.is_not_found() => HostError::NotFound(format!("blob {}", blob)),
                e => e,
            })
        })
        .await
    }

    async fn get_branch_head(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
    ) -> HostResult<CommitId> {
        let branch = branch.clone();
        self.with_repo(repo, move |r| RefManager::resolve_branch(r, &branch)).await
    }

    async fn get_commit_tree(
        &self,
        repo: &RepositoryIdentity,
        commit: CommitId,
    ) -> HostResult<TreeId> {
        self.with_repo(repo, move |r| Ok(commit::get_commit(r, commit)?.tree_id))
            .await
    }

    async fn create_tree(
        &self,
        repo: &RepositoryIdentity,
        base: TreeId,
        changes: &[TreeChange],
    ) -> HostResult<TreeId> {
        let changes = changes.to_vec();
        self.with_repo(repo, move |r| {
            let base = r.find_tree(base.raw())?;
            tree::apply_changes(r, &base, &changes)
        })
        .await
    }

    async fn create_commit(
        &self,
        repo: &RepositoryIdentity,
        tree: TreeId,
        parent: CommitId,
        message: &str,
    ) -> HostResult<CommitId> {
        let signature = self.inner.options.signature.clone();
        let message = message.to_string();
        self.with_repo(repo, move |r| commit::write_commit(r, tree, parent, &message, &signature))
            .await
    }

    async fn update_branch(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        expected: CommitId,
        new: CommitId,
    ) -> HostResult<()> {
        let target = branch.clone();
        self.with_repo(repo, move |r| {
            RefManager::update_branch_if_unchanged(r, &target, expected, new)
        })
        .await?;
        debug!(repo = %repo, %branch, commit = %new.short(), "branch advanced");
        Ok(())
    }
}
