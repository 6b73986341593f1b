//! core type-safe wrappers around git object ids and the values that cross
//! the host boundary.

use std::fmt;
use std::fmt::Formatter;

use git2::Oid;
use serde::{Deserialize, Serialize};

use crate::host::error::{HostError, HostResult};

/// This makes sure we don't accidentally pass a blob ID where a commit ID
/// is expected. The inner Oid is only accessible within the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    /// raw Oid (for internal use only)
    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse CommitId from a hex string
    pub fn from_hex(hex: &str) -> HostResult<Self> {
        parse_oid(hex).map(CommitId)
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git blob identifier, the content hash of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub(crate) Oid);

impl BlobId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    pub fn from_hex(hex: &str) -> HostResult<Self> {
        parse_oid(hex).map(BlobId)
    }

    /// Hash `content` the way git does for a blob, without touching any
    /// repository. Equal payloads always produce equal ids.
    pub fn for_content(content: &[u8]) -> HostResult<Self> {
        let oid = Oid::hash_object(git2::ObjectType::Blob, content)?;
        Ok(Self(oid))
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git tree identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    pub fn from_hex(hex: &str) -> HostResult<Self> {
        parse_oid(hex).map(TreeId)
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of a directory listing entry; a blob for files, a tree for folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub(crate) Oid);

impl ObjectId {
    pub fn from_hex(hex: &str) -> HostResult<Self> {
        parse_oid(hex).map(ObjectId)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn parse_oid(hex: &str) -> HostResult<Oid> {
    Oid::from_str(hex).map_err(|_| HostError::Decode(format!("invalid object id: '{}'", hex)))
}

/// Which hosting service a repository lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// GitHub.com or GitHub Enterprise through the REST API.
    Github,
    /// Bare repositories on the local filesystem.
    Local,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Github => write!(f, "github"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Identifies one logical content repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryIdentity {
    pub provider: Provider,
    /// owning user or organisation
    pub login: String,
    /// repository name under the owner
    pub repo_namespace: String,
}

impl RepositoryIdentity {
    pub fn new(provider: Provider, login: impl Into<String>, repo_namespace: impl Into<String>) -> Self {
        Self {
            provider,
            login: login.into(),
            repo_namespace: repo_namespace.into(),
        }
    }

    /// true when every field needed to address the repository is present
    pub fn is_complete(&self) -> bool {
        !self.login.is_empty() && !self.repo_namespace.is_empty()
    }
}

impl fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.login, self.repo_namespace)
    }
}

/// a validated branch name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    /// the default branch name
    pub const MAIN: &'static str = "main";

    /// create a new BranchName
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        // git is more permissive, but these are the names the hosts agree on
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.contains("..")
            || name.ends_with('/')
            || name.starts_with('/')
            || name.chars().any(|c| c.is_whitespace() || c == '~' || c == '^' || c == ':')
        {
            return Err(InvalidNameError::InvalidPath(name));
        }
        Ok(Self(name))
    }

    /// create the main branch reference
    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    /// get the full ref path (e.g., "refs/heads/main")
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    /// get the short name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// git signature (author/committer info)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    /// create a new signature
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// default signature for store operations
    pub fn gitstore() -> Self {
        Self::new("gitstore", "gitstore@localhost")
    }

    /// convert to git2::Signature
    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::gitstore()
    }
}

/// kind of a directory listing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// A file as returned by a host's contents endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub sha: BlobId,
    pub size: u64,
    /// base64 payload, possibly wrapped across lines. `None` when the file
    /// exceeds the endpoint's inline ceiling and must be read as a blob.
    pub encoded: Option<String>,
}

/// One entry of a host directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    pub sha: ObjectId,
}

/// What lives at a path on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contents {
    File(RemoteFile),
    Directory(Vec<RemoteEntry>),
}

/// One delta entry of a tree rebuild. `blob: None` deletes the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeChange {
    pub path: String,
    pub blob: Option<BlobId>,
}

impl TreeChange {
    pub fn upsert(path: impl Into<String>, blob: BlobId) -> Self {
        Self {
            path: path.into(),
            blob: Some(blob),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            blob: None,
        }
    }
}

/// result of a single-file write through the contents endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileWrite {
    pub blob: BlobId,
    pub commit: CommitId,
}

/// error type for invalid names and paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    InvalidPath(String),
    InvalidSegment(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
            Self::InvalidSegment(seg) => write!(f, "invalid path segment: '{}'", seg),
        }
    }
}

impl std::error::Error for InvalidNameError {}

/// Normalise a repository-relative file path.
///
/// Leading/trailing slashes and empty segments are dropped. `.` and `..`
/// segments are rejected so a path can never escape the repository root.
pub fn normalize_path(path: &str) -> Result<String, InvalidNameError> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" => continue,
            "." | ".." => return Err(InvalidNameError::InvalidSegment(segment.to_string())),
            s if s.contains('\0') || s == ".git" => {
                return Err(InvalidNameError::InvalidSegment(s.to_string()))
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// parent folder of a normalised path; the root is the empty string
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// join a folder and a name, tolerating an empty folder
pub fn join_path(folder: &str, name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}
