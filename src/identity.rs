//! Turning what a caller knows about a repository into a full identity.
//!
//! Callers either hold a complete [`RepositoryIdentity`] already or only a
//! login (optionally `login/repo`). A bare login is looked up in an
//! [`IdentityDirectory`]; the answer is used for the current call chain and
//! not kept around.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::host::RepositoryIdentity;
use crate::store::{StoreError, StoreResult};

/// What the caller has in hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRef {
    Resolved(RepositoryIdentity),
    /// `login`, or `login/repo` when the login owns several repositories
    Login(String),
}

impl From<RepositoryIdentity> for IdentityRef {
    fn from(identity: RepositoryIdentity) -> Self {
        IdentityRef::Resolved(identity)
    }
}

impl From<&str> for IdentityRef {
    fn from(login: &str) -> Self {
        IdentityRef::Login(login.to_string())
    }
}

/// Source of identities for bare logins.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// `repo` narrows the search when a login owns several repositories.
    async fn lookup(&self, login: &str, repo: Option<&str>) -> StoreResult<Option<RepositoryIdentity>>;
}

/// Directory over a fixed list, usually the `[[repositories]]` of the config.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    by_login: HashMap<String, Vec<RepositoryIdentity>>,
}

impl StaticDirectory {
    pub fn new(identities: impl IntoIterator<Item = RepositoryIdentity>) -> Self {
        let mut by_login: HashMap<String, Vec<RepositoryIdentity>> = HashMap::new();
        for identity in identities {
            by_login.entry(identity.login.clone()).or_default().push(identity);
        }
        Self { by_login }
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn lookup(&self, login: &str, repo: Option<&str>) -> StoreResult<Option<RepositoryIdentity>> {
        let Some(candidates) = self.by_login.get(login) else {
            return Ok(None);
        };
        let found = match repo {
            Some(repo) => candidates.iter().find(|c| c.repo_namespace == repo),
            // the first configured repository is the login's default
            None => candidates.first(),
        };
        Ok(found.cloned())
    }
}

/// Resolves [`IdentityRef`]s through a directory.
#[derive(Clone)]
pub struct IdentityResolver {
    directory: Arc<dyn IdentityDirectory>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }

    pub fn from_directory<D: IdentityDirectory + 'static>(directory: D) -> Self {
        Self::new(Arc::new(directory))
    }

    pub async fn resolve(&self, identity: impl Into<IdentityRef>) -> StoreResult<RepositoryIdentity> {
        match identity.into() {
            IdentityRef::Resolved(identity) if identity.is_complete() => Ok(identity),
            IdentityRef::Resolved(identity) => Err(StoreError::IdentityNotFound(identity.to_string())),
            IdentityRef::Login(raw) => {
                let raw = raw.trim();
                let (login, repo) = match raw.split_once('/') {
                    Some((login, repo)) => (login, Some(repo)),
                    None => (raw, None),
                };
                if login.is_empty() {
                    return Err(StoreError::IdentityNotFound(raw.to_string()));
                }

                let found = self.directory.lookup(login, repo).await?;
                debug!(login, ?repo, found = found.is_some(), "identity lookup");
                found.ok_or_else(|| StoreError::IdentityNotFound(raw.to_string()))
            }
        }
    }
}
