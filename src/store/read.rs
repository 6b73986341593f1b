//! Read path: metadata, content and folder listings, served from the cache
//! when possible.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::debug;

use crate::host::{BlobId, Contents, EntryKind, ObjectId, RemoteFile, RepositoryIdentity};
use crate::store::cache::{CacheKey, CacheVariant, Generation};
use crate::store::error::{StoreError, StoreResult};
use crate::store::{Cached, ContentStore};

/// Hash and size of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub content_hash: BlobId,
    pub size: u64,
}

/// Content of a stored file.
///
/// `content` is UTF-8 text, or the base64 encoding of the bytes when read
/// with [`ContentOptions::raw`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub content: String,
    pub content_hash: BlobId,
}

/// Bytes of a file fetched through the blob endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeContent {
    pub content: Vec<u8>,
    pub content_hash: BlobId,
    pub size: u64,
}

/// One entry of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    #[serde(serialize_with = "as_hex")]
    pub content_hash: ObjectId,
}

fn as_hex<S: serde::Serializer>(id: &ObjectId, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(id)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentOptions {
    /// keep the base64 encoding instead of decoding to text
    pub raw: bool,
    pub skip_cache: bool,
}

impl ContentOptions {
    pub fn raw() -> Self {
        Self {
            raw: true,
            skip_cache: false,
        }
    }

    pub fn fresh() -> Self {
        Self {
            raw: false,
            skip_cache: true,
        }
    }
}

/// decode a base64 transfer payload, ignoring line breaks
pub(crate) fn decode_transfer(encoded: &str) -> StoreResult<Vec<u8>> {
    STANDARD
        .decode(strip_line_breaks(encoded))
        .map_err(|e| StoreError::Decode(format!("invalid base64 content: {}", e)))
}

fn strip_line_breaks(encoded: &str) -> String {
    encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

impl ContentStore {
    /// Hash and size of the file at `path`; `None` if there is no file there.
    pub async fn get_meta(
        &self,
        identity: &RepositoryIdentity,
        path: &str,
        skip_cache: bool,
    ) -> StoreResult<Option<FileMeta>> {
        let path = self.check(identity, path)?;
        let key = self.cache_key(identity, &path, CacheVariant::Meta);

        if !skip_cache {
            if let Some(Cached::Meta(meta)) = self.inner.cache.get(&key) {
                return Ok(Some(meta));
            }
        }

        let seen = self.inner.cache.generation();
        let meta = self.fetch_file(identity, &path).await?.map(|file| FileMeta {
            content_hash: file.sha,
            size: file.size,
        });
        if let Some(meta) = meta {
            self.remember(key, Cached::Meta(meta), seen);
        }
        Ok(meta)
    }

    /// Content of the file at `path`; `None` if there is no file there.
    pub async fn get_content(
        &self,
        identity: &RepositoryIdentity,
        path: &str,
        options: ContentOptions,
    ) -> StoreResult<Option<FileContent>> {
        let path = self.check(identity, path)?;
        let variant = if options.raw {
            CacheVariant::RawContent
        } else {
            CacheVariant::Content
        };
        let key = self.cache_key(identity, &path, variant);

        if !options.skip_cache {
            if let Some(Cached::Content(content)) = self.inner.cache.get(&key) {
                return Ok(Some(content));
            }
        }

        let seen = self.inner.cache.generation();
        let Some(file) = self.fetch_file(identity, &path).await? else {
            return Ok(None);
        };

        let content = match &file.encoded {
            Some(encoded) if options.raw => strip_line_breaks(encoded),
            Some(encoded) => String::from_utf8_lossy(&decode_transfer(encoded)?).into_owned(),
            None => {
                // over the host's inline ceiling
                debug!(path = %path, size = file.size, "content not inlined, reading blob");
                let bytes = self.inner.host.get_blob(identity, file.sha).await?;
                let content = if options.raw {
                    STANDARD.encode(&bytes)
                } else {
                    String::from_utf8_lossy(&bytes).into_owned()
                };
                return Ok(Some(FileContent {
                    content,
                    content_hash: file.sha,
                }));
            }
        };

        let content = FileContent {
            content,
            content_hash: file.sha,
        };
        self.remember(key, Cached::Content(content.clone()), seen);
        Ok(Some(content))
    }

    /// Bytes of a file of any size, through the blob endpoint. Never cached.
    pub async fn get_large_content(
        &self,
        identity: &RepositoryIdentity,
        path: &str,
    ) -> StoreResult<Option<LargeContent>> {
        let Some(meta) = self.get_meta(identity, path, true).await? else {
            return Ok(None);
        };
        let content = self.inner.host.get_blob(identity, meta.content_hash).await?;
        Ok(Some(LargeContent {
            content,
            content_hash: meta.content_hash,
            size: meta.size,
        }))
    }

    /// Immediate entries of a folder; empty if the folder does not exist.
    pub async fn list_folder(
        &self,
        identity: &RepositoryIdentity,
        path: &str,
        skip_cache: bool,
    ) -> StoreResult<Vec<FolderEntry>> {
        let path = self.check(identity, path)?;
        let key = self.cache_key(identity, &path, CacheVariant::Listing);

        if !skip_cache {
            if let Some(Cached::Listing(entries)) = self.inner.cache.get(&key) {
                return Ok(entries);
            }
        }

        let seen = self.inner.cache.generation();
        let entries = self.fetch_listing(identity, &path).await?;
        self.remember(key, Cached::Listing(entries.clone()), seen);
        Ok(entries)
    }

    /// Every file at any depth below `path`, sorted by path.
    ///
    /// Listings are fetched fresh, a bounded number of folders at a time.
    pub async fn list_files_recursive(
        &self,
        identity: &RepositoryIdentity,
        path: &str,
    ) -> StoreResult<Vec<FolderEntry>> {
        let root = self.check(identity, path)?;
        let window = self.inner.settings.listing_concurrency.max(1);

        let mut files = Vec::new();
        let mut frontier = vec![root];
        while !frontier.is_empty() {
            let listings: Vec<StoreResult<Vec<FolderEntry>>> = stream::iter(frontier.drain(..))
                .map(|folder| async move { self.fetch_listing(identity, &folder).await })
                .buffered(window)
                .collect()
                .await;

            for listing in listings {
                for entry in listing? {
                    match entry.kind {
                        EntryKind::File => files.push(entry),
                        EntryKind::Dir => frontier.push(entry.path),
                    }
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// `None` for a missing path or a folder
    pub(crate) async fn fetch_file(
        &self,
        identity: &RepositoryIdentity,
        path: &str,
    ) -> StoreResult<Option<RemoteFile>> {
        match self.inner.host.get_contents(identity, &self.inner.branch, path).await? {
            Some(Contents::File(file)) => Ok(Some(file)),
            Some(Contents::Directory(_)) | None => Ok(None),
        }
    }

    pub(crate) async fn fetch_listing(
        &self,
        identity: &RepositoryIdentity,
        path: &str,
    ) -> StoreResult<Vec<FolderEntry>> {
        let entries = match self.inner.host.get_contents(identity, &self.inner.branch, path).await? {
            Some(Contents::Directory(entries)) => entries
                .into_iter()
                .map(|e| FolderEntry {
                    name: e.name,
                    path: e.path,
                    kind: e.kind,
                    content_hash: e.sha,
                })
                .collect(),
            Some(Contents::File(_)) | None => Vec::new(),
        };
        Ok(entries)
    }

    /// cache a read result unless it belongs to an image or the cache was
    /// invalidated since `seen`
    fn remember(&self, key: CacheKey, value: Cached, seen: Generation) {
        if self.inner.settings.uploads.is_image(&key.path) {
            return;
        }
        self.inner.cache.set_if_current(key, value, seen);
    }
}
