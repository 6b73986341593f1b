//! Atomic multi-file commits.
//!
//! A batch becomes exactly one commit or nothing. Blobs are uploaded first,
//! in parallel; they are content-addressed and harmless when orphaned, so a
//! blob upload is only repeated when the host rate-limits it. The read-modify-write of the branch then runs under
//! the [`RetryPolicy`](crate::store::RetryPolicy): each attempt reads the
//! current head, builds its tree on that head's tree and only lands if the
//! branch has not moved in the meantime. A lost race restarts from the head.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::host::{BlobId, CommitId, RepositoryIdentity, TreeChange};
use crate::store::error::{StoreError, StoreResult};
use crate::store::write::WriteOptions;
use crate::store::ContentStore;

/// Progress callback, called with `(completed, total)` blob uploads.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// One file of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    pub path: String,
    pub content: Vec<u8>,
}

impl BatchFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Clone, Default)]
pub struct BatchOptions {
    pub message: Option<String>,
    pub on_progress: Option<ProgressFn>,
}

impl BatchOptions {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, on_progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub commit: CommitId,
    pub files_uploaded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFolderOutcome {
    pub commit: CommitId,
    pub files_deleted: usize,
    pub paths: Vec<String>,
}

impl ContentStore {
    /// Write every file of the batch in a single commit.
    pub async fn upload_batch(
        &self,
        identity: &RepositoryIdentity,
        files: Vec<BatchFile>,
        options: BatchOptions,
    ) -> StoreResult<BatchOutcome> {
        if files.is_empty() {
            return Err(StoreError::EmptyBatch);
        }
        let paths = files
            .iter()
            .map(|f| self.file_path(identity, &f.path))
            .collect::<StoreResult<Vec<_>>>()?;

        let blobs = self.create_blobs(identity, &files, options.on_progress.as_ref()).await?;
        let changes: Vec<TreeChange> = paths
            .iter()
            .zip(blobs)
            .map(|(path, blob)| TreeChange::upsert(path.as_str(), blob))
            .collect();

        let message = options
            .message
            .unwrap_or_else(|| format!("Upload {} files", files.len()));
        let commit = self.commit_changes(identity, "upload_batch", &changes, &message).await?;

        for path in &paths {
            self.invalidate(identity, path);
        }
        Ok(BatchOutcome {
            commit,
            files_uploaded: files.len(),
        })
    }

    /// Write one file of any size through the blob/tree/commit path.
    pub async fn upload_large(
        &self,
        identity: &RepositoryIdentity,
        path: &str,
        content: &[u8],
        options: WriteOptions,
    ) -> StoreResult<BatchOutcome> {
        let message = options.message.unwrap_or_else(|| format!("Upload {}", path));
        self.upload_batch(
            identity,
            vec![BatchFile::new(path, content)],
            BatchOptions::message(message),
        )
        .await
    }

    /// Remove every file under `path` in a single commit.
    pub async fn delete_folder(
        &self,
        identity: &RepositoryIdentity,
        path: &str,
        options: WriteOptions,
    ) -> StoreResult<DeleteFolderOutcome> {
        let folder = self.file_path(identity, path)?;
        let files = self.list_files_recursive(identity, &folder).await?;
        if files.is_empty() {
            return Err(StoreError::NotFound(folder));
        }

        let paths: Vec<String> = files.into_iter().map(|f| f.path).collect();
        let changes: Vec<TreeChange> = paths.iter().map(|p| TreeChange::delete(p.as_str())).collect();
        let message = options
            .message
            .unwrap_or_else(|| format!("Delete folder {}", folder));
        let commit = self.commit_changes(identity, "delete_folder", &changes, &message).await?;

        self.invalidate_folder(identity, &folder);
        Ok(DeleteFolderOutcome {
            commit,
            files_deleted: paths.len(),
            paths,
        })
    }

    /// Upload one blob per distinct content, returning a blob per file.
    async fn create_blobs(
        &self,
        identity: &RepositoryIdentity,
        files: &[BatchFile],
        on_progress: Option<&ProgressFn>,
    ) -> StoreResult<Vec<BlobId>> {
        // local hash -> index of the first file carrying that content
        let mut unique: HashMap<BlobId, usize> = HashMap::new();
        let mut local_ids = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            let id = BlobId::for_content(&file.content)?;
            unique.entry(id).or_insert(i);
            local_ids.push(id);
        }

        let total = unique.len();
        let completed = AtomicUsize::new(0);
        debug!(repo = %identity, files = files.len(), unique = total, "creating blobs");

        let uploads = unique.iter().map(|(&local, &index)| {
            let completed = &completed;
            async move {
                let host = &self.inner.host;
                let remote = self
                    .inner
                    .settings
                    .retry
                    .run_rate_limited("create_blob", || {
                        host.create_blob(identity, &files[index].content)
                    })
                    .await?;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(report) = on_progress {
                    report(done, total);
                }
                Ok::<_, StoreError>((local, remote))
            }
        });
        let remote_ids: HashMap<BlobId, BlobId> = try_join_all(uploads).await?.into_iter().collect();

        local_ids
            .into_iter()
            .map(|local| {
                remote_ids
                    .get(&local)
                    .copied()
                    .ok_or_else(|| StoreError::Decode(format!("no blob uploaded for {}", local)))
            })
            .collect()
    }

    /// Land `changes` on the branch as one commit, retrying lost races.
    async fn commit_changes(
        &self,
        identity: &RepositoryIdentity,
        label: &str,
        changes: &[TreeChange],
        message: &str,
    ) -> StoreResult<CommitId> {
        let commit = self
            .inner
            .settings
            .retry
            .run(label, || self.commit_once(identity, changes, message))
            .await?;

        info!(repo = %identity, commit = %commit.short(), changes = changes.len(), "{} committed", label);
        Ok(commit)
    }

    /// One read-modify-write attempt against the current branch head.
    async fn commit_once(
        &self,
        identity: &RepositoryIdentity,
        changes: &[TreeChange],
        message: &str,
    ) -> StoreResult<CommitId> {
        let host = &self.inner.host;
        let branch = &self.inner.branch;

        let head = host.get_branch_head(identity, branch).await?;
        let base = host.get_commit_tree(identity, head).await?;
        let tree = host.create_tree(identity, base, changes).await?;
        let commit = host.create_commit(identity, tree, head, message).await?;
        host.update_branch(identity, branch, head, commit).await?;
        Ok(commit)
    }
}
