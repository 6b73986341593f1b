//! gitstore - Git-backed content storage
//!
//! This crate stores user-authored content (pages, slide decks, images,
//! theme files) as files in Git repositories and exposes it through a
//! conventional read/write API with a response cache, optimistic locking on
//! content hashes, and atomic multi-file commits that survive concurrent
//! writers racing on the same branch.
//!
//! # Example
//!
//! ```no_run
//! use gitstore::config::StoreConfig;
//! use gitstore::host::{LocalHost, Provider, RepositoryIdentity};
//! use gitstore::store::{ContentOptions, ContentStore};
//!
//! # async fn run() -> Result<(), gitstore::store::StoreError> {
//! let store = ContentStore::from_host(LocalHost::new("./repos"), StoreConfig::default())?;
//! let course = RepositoryIdentity::new(Provider::Local, "acme", "course-101");
//!
//! store.put(&course, "pages/intro.html", b"<h1>Welcome</h1>", Default::default()).await?;
//! let page = store.get_content(&course, "pages/intro.html", ContentOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod host;
pub mod identity;
pub mod store;
