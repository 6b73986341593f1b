//! In-process response cache.
//!
//! Entries are keyed by repository, path and a variant so a metadata hit
//! never answers a content or listing lookup. Storage and expiry are moka's;
//! this layer adds path-aware invalidation and a generation counter so a
//! read that started before an invalidation cannot repopulate stale data.

use std::fmt;
use std::time::Duration;

use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::debug;

use crate::host::parent_path;

/// what was cached for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheVariant {
    Meta,
    Content,
    RawContent,
    Listing,
}

impl CacheVariant {
    pub const ALL: [CacheVariant; 4] = [Self::Meta, Self::Content, Self::RawContent, Self::Listing];

    fn suffix(&self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::Content => "content",
            Self::RawContent => "content:raw",
            Self::Listing => "list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub org: String,
    pub repo: String,
    pub path: String,
    pub variant: CacheVariant,
}

impl CacheKey {
    pub fn new(org: &str, repo: &str, path: &str, variant: CacheVariant) -> Self {
        Self {
            org: org.to_string(),
            repo: repo.to_string(),
            path: path.to_string(),
            variant,
        }
    }

    fn same_repo(&self, org: &str, repo: &str) -> bool {
        self.org == org && self.repo == repo
    }
}

/// `org:repo:path:variant`
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.org, self.repo, self.path, self.variant.suffix())
    }
}

/// Default time-to-live of an entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Upper bound on cached entries before moka starts evicting.
pub const DEFAULT_CAPACITY: u64 = 10_000;

/// Snapshot of the invalidation counter, taken before a read goes to the
/// host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

/// TTL cache shared by every clone of a store.
pub struct CacheStore<V> {
    ttl: Duration,
    entries: Cache<CacheKey, V>,
    /// bumped by every invalidation, held while entries are dropped
    generation: Mutex<u64>,
}

impl<V: Clone + Send + Sync + 'static> CacheStore<V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            ttl,
            entries: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            generation: Mutex::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let hit = self.entries.get(key);
        debug!(key = %key, hit = hit.is_some(), "cache lookup");
        hit
    }

    pub fn set(&self, key: CacheKey, payload: V) {
        self.entries.insert(key, payload);
    }

    pub fn generation(&self) -> Generation {
        Generation(*self.generation.lock())
    }

    /// Store `payload` only if nothing was invalidated since `seen` was
    /// taken. Returns whether the entry was stored.
    pub fn set_if_current(&self, key: CacheKey, payload: V, seen: Generation) -> bool {
        let current = self.generation.lock();
        if *current != seen.0 {
            debug!(key = %key, "cache fill skipped, invalidated while reading");
            return false;
        }
        self.entries.insert(key, payload);
        true
    }

    pub fn invalidate(&self, key: &CacheKey) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.entries.invalidate(key);
    }

    /// Drop every variant of `path` and the listing of each of its ancestors
    /// up to the repository root.
    pub fn invalidate_path(&self, org: &str, repo: &str, path: &str) {
        let mut generation = self.generation.lock();
        *generation += 1;
        for variant in CacheVariant::ALL {
            self.entries.invalidate(&CacheKey::new(org, repo, path, variant));
        }
        self.invalidate_ancestor_listings(org, repo, path);
        debug!(org, repo, path, "cache invalidated");
    }

    /// Drop everything at or below `prefix`, plus the ancestor listings.
    pub fn invalidate_prefix(&self, org: &str, repo: &str, prefix: &str) {
        let prefix = prefix.trim_matches('/');
        let mut generation = self.generation.lock();
        *generation += 1;

        let doomed: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| key.same_repo(org, repo) && is_under(&key.path, prefix))
            .map(|(key, _)| (*key).clone())
            .collect();
        for key in &doomed {
            self.entries.invalidate(key);
        }
        self.invalidate_ancestor_listings(org, repo, prefix);
        debug!(org, repo, prefix, dropped = doomed.len(), "cache prefix invalidated");
    }

    pub fn clear(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.entries.invalidate_all();
    }

    /// number of live entries
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn invalidate_ancestor_listings(&self, org: &str, repo: &str, path: &str) {
        let mut current = path;
        while !current.is_empty() {
            current = parent_path(current);
            self.entries
                .invalidate(&CacheKey::new(org, repo, current, CacheVariant::Listing));
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

fn is_under(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}
