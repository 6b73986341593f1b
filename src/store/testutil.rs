//! Test fixtures: a store over a temporary local host, plus a host wrapper
//! that counts primitive calls, injects competing commits or rate limits, and
//! records what a reader could see just before the branch moves.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::config::StoreConfig;
use crate::host::local::{LocalHost, LocalHostOptions};
use crate::host::{
    BlobId, BranchName, CommitId, Contents, FileWrite, HostError, HostResult, Provider,
    RepositoryIdentity,
    TreeChange, TreeId, VersionControlHost,
};
use crate::store::retry::RetryPolicy;
use crate::store::validate::UploadLimits;
use crate::store::ContentStore;

pub fn identity() -> RepositoryIdentity {
    RepositoryIdentity::new(Provider::Local, "acme", "course-101")
}

/// Store with a 64-byte inline ceiling, a 128-byte single-write threshold
/// and three fast retry attempts.
pub fn setup_store() -> (TempDir, ContentStore, TestHost) {
    let dir = TempDir::new().unwrap();
    let local = LocalHost::with_options(
        dir.path(),
        LocalHostOptions {
            inline_limit: 64,
            ..LocalHostOptions::default()
        },
    );
    let host = TestHost::new(local);
    let config = StoreConfig::default()
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
        .with_uploads(UploadLimits {
            single_write_threshold: 128,
            ..UploadLimits::default()
        });
    let store = ContentStore::from_host(host.clone(), config).unwrap();
    (dir, store, host)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub create_blob: usize,
    pub branch_head_reads: usize,
    pub update_branch: usize,
}

#[derive(Default)]
struct TestState {
    create_blob: AtomicUsize,
    branch_head_reads: AtomicUsize,
    update_branch: AtomicUsize,
    /// competing commits still to inject
    pending_races: AtomicUsize,
    races_injected: AtomicUsize,
    /// rate-limit rejections still to hand out from writes and blob uploads
    pending_rate_limits: AtomicUsize,
    rate_limited: AtomicUsize,
    watched: Mutex<Vec<String>>,
    observations: Mutex<Vec<Vec<bool>>>,
}

#[derive(Clone)]
pub struct TestHost {
    local: LocalHost,
    state: Arc<TestState>,
}

impl TestHost {
    pub fn new(local: LocalHost) -> Self {
        Self {
            local,
            state: Arc::new(TestState::default()),
        }
    }

    pub fn counters(&self) -> Counters {
        Counters {
            create_blob: self.state.create_blob.load(Ordering::SeqCst),
            branch_head_reads: self.state.branch_head_reads.load(Ordering::SeqCst),
            update_branch: self.state.update_branch.load(Ordering::SeqCst),
        }
    }

    /// Land a competing commit right before each of the next `n` branch
    /// updates, so those updates lose the race.
    pub fn race_next_updates(&self, n: usize) {
        self.state.pending_races.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` file writes, file deletes or blob uploads as rate
    /// limited, without applying them.
    pub fn rate_limit_next(&self, n: usize) {
        self.state.pending_rate_limits.store(n, Ordering::SeqCst);
    }

    pub fn rate_limited(&self) -> usize {
        self.state.rate_limited.load(Ordering::SeqCst)
    }

    fn take_rate_limit(&self) -> HostResult<()> {
        let taken = self
            .state
            .pending_rate_limits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            self.state.rate_limited.fetch_add(1, Ordering::SeqCst);
            return Err(HostError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            });
        }
        Ok(())
    }

    /// Before every branch update, record whether each path is visible.
    pub fn observe_before_update(&self, paths: Vec<&str>) {
        *self.state.watched.lock() = paths.into_iter().map(String::from).collect();
    }

    pub fn observations(&self) -> Vec<Vec<bool>> {
        self.state.observations.lock().clone()
    }

    pub async fn head(&self, repo: &RepositoryIdentity) -> CommitId {
        self.local.get_branch_head(repo, &BranchName::main()).await.unwrap()
    }

    pub fn parent_of(&self, repo: &RepositoryIdentity, commit: CommitId) -> Option<CommitId> {
        self.local.commit_info(repo, commit).unwrap().first_parent()
    }

    /// messages of the last `n` commits on the branch, newest first
    pub async fn commit_messages(&self, repo: &RepositoryIdentity, n: usize) -> Vec<String> {
        let mut messages = Vec::new();
        let mut next = Some(self.head(repo).await);
        while let Some(commit) = next {
            if messages.len() == n {
                break;
            }
            let info = self.local.commit_info(repo, commit).unwrap();
            messages.push(info.message.clone());
            next = info.first_parent();
        }
        messages
    }

    /// Write a file without going through the store or its cache.
    pub async fn commit_directly(&self, repo: &RepositoryIdentity, path: &str, content: &[u8]) {
        let main = BranchName::main();
        let prior = match self.local.get_contents(repo, &main, path).await.unwrap() {
            Some(Contents::File(file)) => Some(file.sha),
            _ => None,
        };
        self.local
            .put_file(repo, &main, path, content, prior, "Direct edit")
            .await
            .unwrap();
    }

    async fn inject_race(&self, repo: &RepositoryIdentity, branch: &BranchName) -> HostResult<()> {
        let pending = self.state.pending_races.load(Ordering::SeqCst);
        if pending == 0 {
            return Ok(());
        }
        self.state.pending_races.store(pending - 1, Ordering::SeqCst);
        let n = self.state.races_injected.fetch_add(1, Ordering::SeqCst) + 1;
        let path = format!("race/{}.txt", n);
        self.local
            .put_file(repo, branch, &path, b"competing edit", None, "Concurrent edit")
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VersionControlHost for TestHost {
    fn provider(&self) -> Provider {
        self.local.provider()
    }

    fn content_url(&self, repo: &RepositoryIdentity, branch: &BranchName, path: &str) -> String {
        self.local.content_url(repo, branch, path)
    }

    async fn get_contents(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        path: &str,
    ) -> HostResult<Option<Contents>> {
        self.local.get_contents(repo, branch, path).await
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
        self.take_rate_limit()?;
        self.local.put_file(repo, branch, path, content, prior, message).await
    }

    async fn delete_file(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        path: &str,
        prior: BlobId,
        message: &str,
    ) -> HostResult<CommitId> {
        self.take_rate_limit()?;
        self.local.delete_file(repo, branch, path, prior, message).await
    }

    async fn create_blob(&self, repo: &RepositoryIdentity, content: &[u8]) -> HostResult<BlobId> {
        self.state.create_blob.fetch_add(1, Ordering::SeqCst);
        self.take_rate_limit()?;
        self.local.create_blob(repo, content).await
    }

    async fn get_blob(&self, repo: &RepositoryIdentity, blob: BlobId) -> HostResult<Vec<u8>> {
        self.local.get_blob(repo, blob).await
    }

    async fn get_branch_head(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
    ) -> HostResult<CommitId> {
        self.state.branch_head_reads.fetch_add(1, Ordering::SeqCst);
        self.local.get_branch_head(repo, branch).await
    }

    async fn get_commit_tree(
        &self,
        repo: &RepositoryIdentity,
        commit: CommitId,
    ) -> HostResult<TreeId> {
        self.local.get_commit_tree(repo, commit).await
    }

    async fn create_tree(
        &self,
        repo: &RepositoryIdentity,
        base: TreeId,
        changes: &[TreeChange],
    ) -> HostResult<TreeId> {
        self.local.create_tree(repo, base, changes).await
    }

    async fn create_commit(
        &self,
        repo: &RepositoryIdentity,
        tree: TreeId,
        parent: CommitId,
        message: &str,
    ) -> HostResult<CommitId> {
        self.local.create_commit(repo, tree, parent, message).await
    }

    async fn update_branch(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        expected: CommitId,
        new: CommitId,
    ) -> HostResult<()> {
        self.state.update_branch.fetch_add(1, Ordering::SeqCst);

        let watched = self.state.watched.lock().clone();
        if !watched.is_empty() {
            let mut visible = Vec::with_capacity(watched.len());
            for path in &watched {
                visible.push(self.local.get_contents(repo, branch, path).await?.is_some());
            }
            self.state.observations.lock().push(visible);
        }

        self.inject_race(repo, branch).await?;
        self.local.update_branch(repo, branch, expected, new).await
    }
}
