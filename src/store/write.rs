//! Single-file writes through the host's contents endpoint.
//!
//! Each call produces one commit for one path. The host wants the current
//! blob hash for every update or delete, so it is always read fresh right
//! before the write.

use serde::Serialize;
use tracing::{info, warn};

use crate::host::{join_path, BlobId, CommitId, InvalidNameError, RepositoryIdentity};
use crate::store::error::{StoreError, StoreResult};
use crate::store::validate::{sanitize_filename, validate_file};
use crate::store::ContentStore;

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// fail with [`StoreError::Conflict`] unless the file currently has this hash
    pub expected_hash: Option<BlobId>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub message: Option<String>,
}

impl WriteOptions {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    pub content_hash: BlobId,
    pub commit: CommitId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub path: String,
    pub content_hash: BlobId,
    /// where a browser can fetch the file
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub path: String,
    pub commit: CommitId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteMultipleOutcome {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteFailure>,
}

impl DeleteMultipleOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

impl ContentStore {
    /// Create or replace the file at `path`.
    pub async fn put(
        &self,
        identity: &RepositoryIdentity,
        path: &str,
        content: &[u8],
        options: PutOptions,
    ) -> StoreResult<PutOutcome> {
        let path = self.file_path(identity, path)?;
        let current = self.fetch_file(identity, &path).await?.map(|f| f.sha);

        if let Some(expected) = options.expected_hash {
            if current != Some(expected) {
                return Err(StoreError::Conflict {
                    path,
                    expected: expected.to_string(),
                    actual: current.map_or_else(|| "nothing".to_string(), |h| h.to_string()),
                });
            }
        }

        let message = options.message.unwrap_or_else(|| match current {
            Some(_) => format!("Update {}", path),
            None => format!("Create {}", path),
        });
        let (host, branch) = (&self.inner.host, &self.inner.branch);
        let write = self
            .inner
            .settings
            .retry
            .run_rate_limited("put_file", || {
                host.put_file(identity, branch, &path, content, current, &message)
            })
            .await;
        // a failed write may still have raced with a successful one
        self.invalidate(identity, &path);
        let write = write?;

        info!(repo = %identity, path = %path, commit = %write.commit.short(), "file written");
        Ok(PutOutcome {
            content_hash: write.blob,
            commit: write.commit,
        })
    }

    /// Validate and store an uploaded file under a fresh, sanitised name in
    /// `folder`. Files above the single-write threshold go through the
    /// atomic batch path.
    pub async fn upload(
        &self,
        identity: &RepositoryIdentity,
        file: &[u8],
        filename: &str,
        folder: &str,
        options: WriteOptions,
    ) -> StoreResult<UploadOutcome> {
        let limits = &self.inner.settings.uploads;
        validate_file(filename, file.len() as u64, limits).into_result()?;

        let folder = self.check(identity, folder)?;
        let path = join_path(&folder, &sanitize_filename(filename));
        let message = options
            .message
            .unwrap_or_else(|| format!("Upload {}", path));

        let content_hash = if file.len() as u64 <= limits.single_write_threshold {
            let put = PutOptions {
                expected_hash: None,
                message: Some(message),
            };
            self.put(identity, &path, file, put).await?.content_hash
        } else {
            self.upload_large(identity, &path, file, WriteOptions::message(message))
                .await?;
            // same hash the host computed for the blob
            BlobId::for_content(file)?
        };

        let url = self.inner.host.content_url(identity, &self.inner.branch, &path);
        Ok(UploadOutcome {
            path,
            content_hash,
            url,
        })
    }

    /// Delete the file at `path`; [`StoreError::NotFound`] if there is none.
    pub async fn delete(
        &self,
        identity: &RepositoryIdentity,
        path: &str,
        options: WriteOptions,
    ) -> StoreResult<DeleteOutcome> {
        let path = self.file_path(identity, path)?;
        let Some(current) = self.fetch_file(identity, &path).await? else {
            return Err(StoreError::NotFound(path));
        };

        let message = options.message.unwrap_or_else(|| format!("Delete {}", path));
        let (host, branch) = (&self.inner.host, &self.inner.branch);
        let commit = self
            .inner
            .settings
            .retry
            .run_rate_limited("delete_file", || {
                host.delete_file(identity, branch, &path, current.sha, &message)
            })
            .await;
        self.invalidate(identity, &path);
        let commit = commit?;

        info!(repo = %identity, path = %path, commit = %commit.short(), "file deleted");
        Ok(DeleteOutcome { path, commit })
    }

    /// Delete each path in turn, one commit per file. Failures are collected
    /// and never stop the remaining deletions.
    pub async fn delete_multiple<I>(
        &self,
        identity: &RepositoryIdentity,
        paths: I,
        options: WriteOptions,
    ) -> DeleteMultipleOutcome
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut outcome = DeleteMultipleOutcome::default();
        for path in paths {
            let path = path.as_ref();
            match self.delete(identity, path, options.clone()).await {
                Ok(deleted) => outcome.deleted.push(deleted.path),
                Err(e) => {
                    warn!(repo = %identity, path, error = %e, "delete failed, continuing");
                    outcome.errors.push(DeleteFailure {
                        path: path.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        outcome
    }

    /// a normalised path that names a file, not the repository root
    pub(crate) fn file_path(&self, identity: &RepositoryIdentity, path: &str) -> StoreResult<String> {
        let path = self.check(identity, path)?;
        if path.is_empty() {
            return Err(InvalidNameError::Empty.into());
        }
        Ok(path)
    }
}
