//! GitHub / GitHub Enterprise host over the REST v3 API.
//!
//! Single-file reads and writes go through the contents API; atomic batches
//! are assembled from the git data API (blobs, trees, commits, refs). Every
//! response feeds the shared [`RateLimitState`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{HostError, HostResult};
use super::rate_limit::{is_rate_limited, RateLimitState};
use super::types::{
    BlobId, BranchName, CommitId, Contents, EntryKind, FileWrite, ObjectId, Provider, RemoteEntry,
    RemoteFile, RepositoryIdentity, TreeChange, TreeId,
};
use super::VersionControlHost;

const ACCEPT_JSON: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";
/// regular, non-executable file
const FILE_MODE: &str = "100644";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Connection settings for a [`GitHubHost`].
#[derive(Debug, Clone)]
pub struct GitHubHostOptions {
    /// REST root, e.g. `https://api.github.com`
    pub api_url: String,
    /// root of raw file URLs handed out by `content_url`
    pub raw_url: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
    /// self-throttle once fewer calls than this remain
    pub rate_limit_buffer: u32,
}

impl Default for GitHubHostOptions {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            raw_url: "https://raw.githubusercontent.com".to_string(),
            token: None,
            request_timeout: Duration::from_secs(30),
            rate_limit_buffer: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Host struct
// ---------------------------------------------------------------------------

/// Host backed by the GitHub REST API.
#[derive(Clone)]
pub struct GitHubHost {
    inner: Arc<GitHubInner>,
}

struct GitHubInner {
    client: reqwest::Client,
    api_url: Url,
    raw_url: String,
    token: Option<String>,
    rate_limit: RateLimitState,
    rate_limit_buffer: u32,
}

impl GitHubHost {
    pub fn new(options: GitHubHostOptions) -> HostResult<Self> {
        let api_url = Url::parse(&options.api_url)
            .map_err(|e| HostError::InvalidUrl(format!("{}: {}", options.api_url, e)))?;
        if api_url.cannot_be_a_base() {
            return Err(HostError::InvalidUrl(options.api_url));
        }

        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .user_agent(concat!("gitstore/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            inner: Arc::new(GitHubInner {
                client,
                api_url,
                raw_url: options.raw_url.trim_end_matches('/').to_string(),
                token: options.token,
                rate_limit: RateLimitState::new(),
                rate_limit_buffer: options.rate_limit_buffer,
            }),
        })
    }

    /// Quota state as last reported by the API.
    pub fn rate_limit(&self) -> &RateLimitState {
        &self.inner.rate_limit
    }

    /// `{api}/repos/{login}/{repo}/{segments...}`, each segment escaped
    fn repo_url<'a>(
        &self,
        repo: &RepositoryIdentity,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> HostResult<Url> {
        let mut url = self.inner.api_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| HostError::InvalidUrl(self.inner.api_url.to_string()))?;
            path.pop_if_empty()
                .extend(["repos", repo.login.as_str(), repo.repo_namespace.as_str()])
                .extend(segments.into_iter().filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    fn contents_url(&self, repo: &RepositoryIdentity, path: &str) -> HostResult<Url> {
        self.repo_url(repo, std::iter::once("contents").chain(path.split('/')))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .inner
            .client
            .request(method, url)
            .header(ACCEPT, ACCEPT_JSON)
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.inner.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    /// Send a request, translating non-success statuses into [`HostError`].
    ///
    /// `subject` names the path or branch the request is about.
    async fn send(&self, request: RequestBuilder, subject: &str) -> HostResult<Response> {
        self.inner.rate_limit.throttle(self.inner.rate_limit_buffer).await;

        let response = request.send().await?;
        self.inner.rate_limit.record(response.headers());

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let err = classify_error(status.as_u16(), &headers, &body, subject, &self.inner.rate_limit);
        debug!(status = status.as_u16(), subject, error = %err, "github request failed");
        Err(err)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, subject: &str) -> HostResult<T> {
        let response = self.send(request, subject).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ContentItem {
    name: String,
    path: String,
    sha: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "type")]
    kind: String,
    content: Option<String>,
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentWriteResponse {
    content: Option<ShaRef>,
    commit: ShaRef,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaRef,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: ShaRef,
}

#[derive(Debug, Serialize)]
struct PutContentsBody<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeleteContentsBody<'a> {
    message: &'a str,
    sha: String,
    branch: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateBlobBody {
    content: String,
    encoding: &'static str,
}

#[derive(Debug, Serialize)]
struct TreeEntryBody {
    path: String,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    /// `null` removes the path from the base tree
    sha: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateTreeBody {
    base_tree: String,
    tree: Vec<TreeEntryBody>,
}

#[derive(Debug, Serialize)]
struct CreateCommitBody<'a> {
    message: &'a str,
    tree: String,
    parents: Vec<String>,
}

#[derive(Debug, Serialize)]
struct UpdateRefBody {
    sha: String,
    force: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Turn a contents API payload (object for a file, array for a folder) into
/// [`Contents`]. Symlinks and submodules are not content: they are skipped in
/// listings and read as `None` when asked for directly.
fn parse_contents(value: serde_json::Value) -> HostResult<Option<Contents>> {
    if value.is_array() {
        let items: Vec<ContentItem> = serde_json::from_value(value)?;
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let kind = match item.kind.as_str() {
                "file" => EntryKind::File,
                "dir" => EntryKind::Dir,
                _ => continue,
            };
            entries.push(RemoteEntry {
                sha: ObjectId::from_hex(&item.sha)?,
                name: item.name,
                path: item.path,
                kind,
            });
        }
        return Ok(Some(Contents::Directory(entries)));
    }

    let item: ContentItem = serde_json::from_value(value)?;
    if item.kind != "file" {
        debug!(path = %item.path, kind = %item.kind, "not a file, treating as absent");
        return Ok(None);
    }
    // files over the inline ceiling come back with encoding "none"
    let encoded = match (item.encoding.as_deref(), item.content) {
        (Some("base64"), Some(content)) if !content.is_empty() || item.size == 0 => Some(content),
        _ => None,
    };
    Ok(Some(Contents::File(RemoteFile {
        sha: BlobId::from_hex(&item.sha)?,
        size: item.size,
        encoded,
    })))
}

fn decode_base64(encoded: &str) -> HostResult<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| HostError::Decode(format!("invalid base64 payload: {}", e)))
}

/// Map a failed response onto the error taxonomy the store understands.
fn classify_error(
    status: u16,
    headers: &HeaderMap,
    body: &str,
    subject: &str,
    rate_limit: &RateLimitState,
) -> HostError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.trim().to_string());
    let lowered = message.to_ascii_lowercase();

    match status {
        404 => HostError::NotFound(subject.to_string()),
        409 => HostError::StaleContent {
            path: subject.to_string(),
        },
        422 if lowered.contains("fast forward") => HostError::NotFastForward {
            branch: subject.to_string(),
        },
        // contents API: update of an existing file without its sha
        422 if lowered.contains("sha") => HostError::StaleContent {
            path: subject.to_string(),
        },
        403 | 429 if is_rate_limited(status, headers) => {
            let retry_after = rate_limit.retry_hint(headers);
            warn!(status, ?retry_after, "github rate limit hit");
            HostError::RateLimited { retry_after }
        }
        _ => HostError::Status { status, message },
    }
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl VersionControlHost for GitHubHost {
    fn provider(&self) -> Provider {
        Provider::Github
    }

    fn content_url(&self, repo: &RepositoryIdentity, branch: &BranchName, path: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.inner.raw_url, repo.login, repo.repo_namespace, branch, path
        )
    }

    async fn get_contents(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        path: &str,
    ) -> HostResult<Option<Contents>> {
        let mut url = self.contents_url(repo, path)?;
        url.query_pairs_mut().append_pair("ref", branch.as_str());

        match self.send_json::<serde_json::Value>(self.request(Method::GET, url), path).await {
            Ok(value) => parse_contents(value),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
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
        let body = PutContentsBody {
            message,
            content: STANDARD.encode(content),
            branch: branch.as_str(),
            sha: prior.map(|b| b.to_string()),
        };
        let url = self.contents_url(repo, path)?;
        let response: ContentWriteResponse = self
            .send_json(self.request(Method::PUT, url).json(&body), path)
            .await?;

        let blob = match response.content {
            Some(c) => BlobId::from_hex(&c.sha)?,
            None => BlobId::for_content(content)?,
        };
        Ok(FileWrite {
            blob,
            commit: CommitId::from_hex(&response.commit.sha)?,
        })
    }

    async fn delete_file(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        path: &str,
        prior: BlobId,
        message: &str,
    ) -> HostResult<CommitId> {
        let body = DeleteContentsBody {
            message,
            sha: prior.to_string(),
            branch: branch.as_str(),
        };
        let url = self.contents_url(repo, path)?;
        let response: ContentWriteResponse = self
            .send_json(self.request(Method::DELETE, url).json(&body), path)
            .await?;
        CommitId::from_hex(&response.commit.sha)
    }

    async fn create_blob(&self, repo: &RepositoryIdentity, content: &[u8]) -> HostResult<BlobId> {
        let body = CreateBlobBody {
            content: STANDARD.encode(content),
            encoding: "base64",
        };
        let url = self.repo_url(repo, ["git", "blobs"])?;
        let response: ShaRef = self
            .send_json(self.request(Method::POST, url).json(&body), "blob")
            .await?;
        BlobId::from_hex(&response.sha)
    }

    async fn get_blob(&self, repo: &RepositoryIdentity, blob: BlobId) -> HostResult<Vec<u8>> {
        let sha = blob.to_string();
        let url = self.repo_url(repo, ["git", "blobs", sha.as_str()])?;
        let response: BlobResponse = self.send_json(self.request(Method::GET, url), &sha).await?;
        match response.encoding.as_str() {
            "base64" => decode_base64(&response.content),
            "utf-8" => Ok(response.content.into_bytes()),
            other => Err(HostError::Decode(format!("unknown blob encoding '{}'", other))),
        }
    }

    async fn get_branch_head(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
    ) -> HostResult<CommitId> {
        let segments = ["git", "ref", "heads"].into_iter().chain(branch.as_str().split('/'));
        let url = self.repo_url(repo, segments)?;
        let response: RefResponse = self
            .send_json(self.request(Method::GET, url), branch.as_str())
            .await?;
        CommitId::from_hex(&response.object.sha)
    }

    async fn get_commit_tree(
        &self,
        repo: &RepositoryIdentity,
        commit: CommitId,
    ) -> HostResult<TreeId> {
        let sha = commit.to_string();
        let url = self.repo_url(repo, ["git", "commits", sha.as_str()])?;
        let response: CommitResponse = self.send_json(self.request(Method::GET, url), &sha).await?;
        TreeId::from_hex(&response.tree.sha)
    }

    async fn create_tree(
        &self,
        repo: &RepositoryIdentity,
        base: TreeId,
        changes: &[TreeChange],
    ) -> HostResult<TreeId> {
        let body = CreateTreeBody {
            base_tree: base.to_string(),
            tree: changes
                .iter()
                .map(|c| TreeEntryBody {
                    path: c.path.clone(),
                    mode: FILE_MODE,
                    kind: "blob",
                    sha: c.blob.map(|b| b.to_string()),
                })
                .collect(),
        };
        let url = self.repo_url(repo, ["git", "trees"])?;
        let response: ShaRef = self
            .send_json(self.request(Method::POST, url).json(&body), "tree")
            .await?;
        TreeId::from_hex(&response.sha)
    }

    async fn create_commit(
        &self,
        repo: &RepositoryIdentity,
        tree: TreeId,
        parent: CommitId,
        message: &str,
    ) -> HostResult<CommitId> {
        let body = CreateCommitBody {
            message,
            tree: tree.to_string(),
            parents: vec![parent.to_string()],
        };
        let url = self.repo_url(repo, ["git", "commits"])?;
        let response: ShaRef = self
            .send_json(self.request(Method::POST, url).json(&body), "commit")
            .await?;
        CommitId::from_hex(&response.sha)
    }

    async fn update_branch(
        &self,
        repo: &RepositoryIdentity,
        branch: &BranchName,
        expected: CommitId,
        new: CommitId,
    ) -> HostResult<()> {
        // the ref API has no compare-and-swap; force=false only rejects
        // updates that are not fast forwards, so a head that moved past
        // `expected` is caught because `new` is its child
        let body = UpdateRefBody {
            sha: new.to_string(),
            force: false,
        };
        let segments = ["git", "refs", "heads"].into_iter().chain(branch.as_str().split('/'));
        let url = self.repo_url(repo, segments)?;
        self.send(self.request(Method::PATCH, url).json(&body), branch.as_str())
            .await?;
        debug!(repo = %repo, %branch, from = %expected.short(), to = %new.short(), "github ref updated");
        Ok(())
    }
}
