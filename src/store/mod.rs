//! content store for gitstore
//!
//! [`ContentStore`] is the API the rest of an application uses. It never
//! touches git directly; everything goes through a
//! [`VersionControlHost`](crate::host::VersionControlHost).
//!
//!  # Write paths
//!
//! ```text
//!   put / delete ──────────────► contents endpoint (one file, one commit,
//!                                 retried only when rate limited)
//!
//!   upload_batch / upload_large / delete_folder
//!        │
//!        ├─ blobs (parallel, once per unique content)
//!        │
//!        └─ RetryPolicy ─┬─ branch head
//!                        ├─ base tree
//!                        ├─ new tree (base + changes)
//!                        ├─ commit (parent = head)
//!                        └─ compare-and-swap branch
//! ```
//!
//! Every write ends by invalidating the cache for the touched paths and the
//! listings of their parent folders.
//!
//! # Usage
//!
//! ```ignore
//! use gitstore::host::{LocalHost, Provider, RepositoryIdentity};
//! use gitstore::store::{BatchFile, ContentStore};
//! use gitstore::config::StoreConfig;
//!
//! let store = ContentStore::from_host(LocalHost::new("./repos"), StoreConfig::default())?;
//! let course = RepositoryIdentity::new(Provider::Local, "acme", "course-101");
//!
//! store.put(&course, "pages/intro.html", b"<h1>Hi</h1>", Default::default()).await?;
//! store
//!     .upload_batch(
//!         &course,
//!         vec![
//!             BatchFile::new("deck/slide1.html", "<section>1</section>"),
//!             BatchFile::new("deck/slide2.html", "<section>2</section>"),
//!         ],
//!         Default::default(),
//!     )
//!     .await?;
//! ```

mod batch;
pub mod cache;
mod error;
mod orphans;
mod read;
pub mod retry;
pub mod validate;
mod write;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::host::{normalize_path, BranchName, RepositoryIdentity, VersionControlHost};

pub use batch::{BatchFile, BatchOptions, BatchOutcome, DeleteFolderOutcome, ProgressFn};
pub use cache::{CacheKey, CacheStore, CacheVariant, Generation};
pub use error::{StoreError, StoreResult};
pub use orphans::OrphanedImage;
pub use read::{ContentOptions, FileContent, FileMeta, FolderEntry, LargeContent};
pub use retry::{RetryPolicy, Retryable};
pub use validate::{
    sanitize_filename, validate_file, FileValidation, UploadLimits, ValidationError,
    ALLOWED_EXTENSIONS, IMAGE_EXTENSIONS, MAX_FILE_SIZE,
};
pub use write::{
    DeleteFailure, DeleteMultipleOutcome, DeleteOutcome, PutOptions, PutOutcome, UploadOutcome,
    WriteOptions,
};

/// A cached read result.
#[derive(Debug, Clone)]
pub enum Cached {
    Meta(FileMeta),
    Content(FileContent),
    Listing(Vec<FolderEntry>),
}

/// Git-backed content store.
///
/// Clone this to share across tasks - it uses Arc internally, and all clones
/// share one cache.
#[derive(Clone)]
pub struct ContentStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    host: Arc<dyn VersionControlHost>,
    branch: BranchName,
    cache: CacheStore<Cached>,
    settings: StoreConfig,
}

impl ContentStore {
    pub fn new(host: Arc<dyn VersionControlHost>, settings: StoreConfig) -> StoreResult<Self> {
        let branch = BranchName::new(settings.branch.clone())?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                host,
                branch,
                cache: CacheStore::new(settings.cache_ttl()),
                settings,
            }),
        })
    }

    pub fn from_host<H>(host: H, settings: StoreConfig) -> StoreResult<Self>
    where
        H: VersionControlHost + 'static,
    {
        Self::new(Arc::new(host), settings)
    }

    pub fn branch(&self) -> &BranchName {
        &self.inner.branch
    }

    pub fn settings(&self) -> &StoreConfig {
        &self.inner.settings
    }

    pub fn upload_limits(&self) -> &UploadLimits {
        &self.inner.settings.uploads
    }

    pub fn cache(&self) -> &CacheStore<Cached> {
        &self.inner.cache
    }

    /// Check the identity against the host and normalise `path`.
    fn check(&self, identity: &RepositoryIdentity, path: &str) -> StoreResult<String> {
        if !identity.is_complete() {
            return Err(StoreError::IdentityNotFound(identity.to_string()));
        }
        let expected = self.inner.host.provider();
        if identity.provider != expected {
            return Err(StoreError::ProviderMismatch {
                expected,
                actual: identity.provider,
            });
        }
        Ok(normalize_path(path)?)
    }

    fn cache_key(&self, identity: &RepositoryIdentity, path: &str, variant: CacheVariant) -> CacheKey {
        CacheKey::new(&identity.login, &identity.repo_namespace, path, variant)
    }

    fn invalidate(&self, identity: &RepositoryIdentity, path: &str) {
        self.inner
            .cache
            .invalidate_path(&identity.login, &identity.repo_namespace, path);
    }

    fn invalidate_folder(&self, identity: &RepositoryIdentity, folder: &str) {
        self.inner
            .cache
            .invalidate_prefix(&identity.login, &identity.repo_namespace, folder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{LocalHost, Provider};
    use crate::store::testutil::{identity, setup_store};

    #[tokio::test]
    async fn rejects_identity_for_other_provider() {
        let (_dir, store, _) = setup_store();
        let github = RepositoryIdentity::new(Provider::Github, "acme", "course-101");

        let err = store.get_meta(&github, "a.txt", false).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ProviderMismatch {
                expected: Provider::Local,
                actual: Provider::Github
            }
        ));
    }

    #[tokio::test]
    async fn rejects_incomplete_identity() {
        let (_dir, store, _) = setup_store();
        let incomplete = RepositoryIdentity::new(Provider::Local, "acme", "");
        let err = store.list_folder(&incomplete, "", false).await.unwrap_err();
        assert!(matches!(err, StoreError::IdentityNotFound(_)));
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let (_dir, store, _) = setup_store();
        let err = store.get_meta(&identity(), "../secrets", false).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
    }

    #[test]
    fn rejects_invalid_branch() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = ContentStore::from_host(
            LocalHost::new(dir.path()),
            StoreConfig::default().with_branch("bad branch"),
        );
        assert!(matches!(result, Err(StoreError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn clones_share_the_cache() {
        let (_dir, store, _) = setup_store();
        let id = identity();
        store.put(&id, "a.html", b"a", Default::default()).await.unwrap();

        let clone = store.clone();
        clone.get_meta(&id, "a.html", false).await.unwrap();
        assert_eq!(store.cache().len(), 1);
    }
}
