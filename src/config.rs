//! TOML configuration for the store, its host and the known repositories.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::host::github::{GitHubHost, GitHubHostOptions};
use crate::host::local::{LocalHost, LocalHostOptions};
use crate::host::{
    BranchName, GitSignature, HostError, InvalidNameError, RepositoryIdentity, VersionControlHost,
};
use crate::store::retry::RetryPolicy;
use crate::store::validate::UploadLimits;

/// errors raised while loading configuration or building what it describes
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid store branch: {0}")]
    InvalidBranch(#[from] InvalidNameError),

    #[error("failed to set up host: {0}")]
    Host(#[from] HostError),
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub host: HostConfig,
    pub repositories: Vec<RepositoryIdentity>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// branch every read and write targets
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// folders listed at once by recursive listings
    #[serde(default = "default_listing_concurrency")]
    pub listing_concurrency: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub uploads: UploadLimits,
    /// author and committer of commits made by the store
    #[serde(default)]
    pub committer: GitSignature,
}

fn default_branch() -> String {
    BranchName::MAIN.to_string()
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_listing_concurrency() -> usize {
    3
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            cache_ttl_secs: default_cache_ttl_secs(),
            listing_concurrency: default_listing_concurrency(),
            retry: RetryPolicy::default(),
            uploads: UploadLimits::default(),
            committer: GitSignature::default(),
        }
    }
}

impl StoreConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_uploads(mut self, uploads: UploadLimits) -> Self {
        self.uploads = uploads;
        self
    }

    pub fn with_listing_concurrency(mut self, concurrency: usize) -> Self {
        self.listing_concurrency = concurrency;
        self
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Where repositories live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HostConfig {
    Local(LocalConfig),
    Github(GitHubConfig),
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::Local(LocalConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_root")]
    pub root: PathBuf,
    #[serde(default = "default_inline_limit")]
    pub inline_limit: u64,
}

fn default_local_root() -> PathBuf {
    PathBuf::from("./repos")
}

fn default_inline_limit() -> u64 {
    LocalHostOptions::DEFAULT_INLINE_LIMIT
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root: default_local_root(),
            inline_limit: default_inline_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_raw_url")]
    pub raw_url: String,
    /// Name of the environment variable that holds the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Minimum number of API calls to keep in reserve before self-throttling.
    #[serde(default = "default_rate_limit_buffer")]
    pub rate_limit_buffer: u32,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_raw_url() -> String {
    "https://raw.githubusercontent.com".to_string()
}

fn default_token_env() -> String {
    "GITSTORE_GITHUB_TOKEN".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_rate_limit_buffer() -> u32 {
    50
}

impl HostConfig {
    /// Build the configured host.
    ///
    /// The local host needs the store's branch and committer because it
    /// creates repositories and signs commits itself.
    pub fn connect(&self, store: &StoreConfig) -> Result<Arc<dyn VersionControlHost>, ConfigError> {
        match self {
            HostConfig::Local(local) => {
                let initial_branch = BranchName::new(store.branch.clone())?;
                let host = LocalHost::with_options(
                    &local.root,
                    LocalHostOptions {
                        initial_branch,
                        signature: store.committer.clone(),
                        inline_limit: local.inline_limit,
                    },
                );
                Ok(Arc::new(host))
            }
            HostConfig::Github(github) => {
                let host = GitHubHost::new(GitHubHostOptions {
                    api_url: github.api_url.clone(),
                    raw_url: github.raw_url.clone(),
                    token: std::env::var(&github.token_env).ok().filter(|t| !t.is_empty()),
                    request_timeout: Duration::from_secs(github.request_timeout_secs),
                    rate_limit_buffer: github.rate_limit_buffer,
                })?;
                Ok(Arc::new(host))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Provider;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.host, HostConfig::Local(LocalConfig::default()));
        assert!(config.repositories.is_empty());
        assert_eq!(config.store.retry.max_attempts, 5);
        assert_eq!(config.store.cache_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn parses_full_config() {
        let raw = r#"
            [store]
            branch = "content"
            cache_ttl_secs = 5
            listing_concurrency = 8

            [store.retry]
            max_attempts = 3
            base_delay_ms = 50

            [store.uploads]
            max_file_size = 2048
            allowed_extensions = ["png", "html"]

            [store.committer]
            name = "Course Bot"
            email = "bot@school.test"

            [host]
            kind = "github"
            api_url = "https://git.example.com/api/v3"
            token_env = "SCHOOL_TOKEN"

            [[repositories]]
            provider = "github"
            login = "acme"
            repo_namespace = "course-101"
        "#;
        let config = Config::from_toml_str(raw).unwrap();

        assert_eq!(config.store.branch, "content");
        assert_eq!(config.store.listing_concurrency, 8);
        assert_eq!(config.store.retry, RetryPolicy::new(3, Duration::from_millis(50)));
        assert_eq!(config.store.uploads.max_file_size, 2048);
        // unspecified upload keys keep their defaults
        assert_eq!(
            config.store.uploads.single_write_threshold,
            UploadLimits::default().single_write_threshold
        );
        assert_eq!(config.store.committer.name, "Course Bot");

        match &config.host {
            HostConfig::Github(github) => {
                assert_eq!(github.api_url, "https://git.example.com/api/v3");
                assert_eq!(github.raw_url, default_raw_url());
                assert_eq!(github.token_env, "SCHOOL_TOKEN");
                assert_eq!(github.rate_limit_buffer, 50);
            }
            other => panic!("expected github host, got {:?}", other),
        }

        assert_eq!(
            config.repositories,
            vec![RepositoryIdentity::new(Provider::Github, "acme", "course-101")]
        );
    }

    #[test]
    fn rejects_unknown_host_kind() {
        let err = Config::from_toml_str("[host]\nkind = \"svn\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn builder_methods() {
        let config = StoreConfig::default()
            .with_branch("drafts")
            .with_cache_ttl(Duration::from_secs(1))
            .with_listing_concurrency(1);
        assert_eq!(config.branch, "drafts");
        assert_eq!(config.cache_ttl_secs, 1);
        assert_eq!(config.listing_concurrency, 1);
    }

    #[test]
    fn connects_local_host() {
        let dir = tempfile::TempDir::new().unwrap();
        let host = HostConfig::Local(LocalConfig {
            root: dir.path().to_path_buf(),
            inline_limit: 10,
        })
        .connect(&StoreConfig::default())
        .unwrap();
        assert_eq!(host.provider(), Provider::Local);
    }

    #[test]
    fn invalid_branch_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = HostConfig::Local(LocalConfig {
            root: dir.path().to_path_buf(),
            inline_limit: 10,
        })
        .connect(&StoreConfig::default().with_branch("bad..branch"));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidBranch(InvalidNameError::InvalidPath(_)))
        ));
    }
}
