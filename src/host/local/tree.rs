//!  tree operations for snapshot rebuilding.
//!
//! in Git, a tree is a directory. A stored file at `a/b/c.html` lives in the
//! root tree's `a` subtree, whose `b` subtree holds the `c.html` blob.
//!
//! this module provides safe abstractions over Git's tree manipulation,
//! which is notoriously fiddly to get right: a nested change has to rewrite
//! every tree between the file and the root, and a folder whose last entry
//! is removed has to disappear from its parent.

use std::collections::BTreeMap;
use std::path::Path;

use git2::{FileMode, ObjectType, Repository, Tree};

use crate::host::error::{HostError, HostResult};
use crate::host::types::{join_path, BlobId, EntryKind, ObjectId, RemoteEntry, TreeChange, TreeId};

/// What a path resolves to inside a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathEntry {
    Blob(BlobId),
    Tree(TreeId),
}

/// resolve `path` inside `tree`; the empty path is the tree itself
pub fn lookup(tree: &Tree<'_>, path: &str) -> HostResult<Option<PathEntry>> {
    if path.is_empty() {
        return Ok(Some(PathEntry::Tree(TreeId::new(tree.id()))));
    }

    let entry = match tree.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(HostError::Git(e)),
    };

    let found = match entry.kind() {
        Some(ObjectType::Blob) => Some(PathEntry::Blob(BlobId::new(entry.id()))),
        Some(ObjectType::Tree) => Some(PathEntry::Tree(TreeId::new(entry.id()))),
        // submodule commits and the like are not content
        _ => None,
    };
    Ok(found)
}

/// list the immediate entries of a folder tree, in git's name order
pub fn list_entries(repo: &Repository, tree_id: TreeId, folder: &str) -> HostResult<Vec<RemoteEntry>> {
    let tree = repo.find_tree(tree_id.raw())?;

    let entries = tree
        .iter()
        .filter_map(|entry| {
            let kind = match entry.kind() {
                Some(ObjectType::Blob) => EntryKind::File,
                Some(ObjectType::Tree) => EntryKind::Dir,
                _ => return None,
            };
            let name = entry.name()?.to_string();
            Some(RemoteEntry {
                path: join_path(folder, &name),
                name,
                kind,
                sha: ObjectId(entry.id()),
            })
        })
        .collect();

    Ok(entries)
}

/// write a new tree equal to `base` with `changes` applied
///
/// deleting a path that does not exist is a no-op, and folders left empty
/// by deletions are dropped from their parent
pub fn apply_changes(repo: &Repository, base: &Tree<'_>, changes: &[TreeChange]) -> HostResult<TreeId> {
    let pending: Vec<(String, Option<git2::Oid>)> = changes
        .iter()
        .map(|c| (c.path.clone(), c.blob.map(|b| b.raw())))
        .collect();

    match rebuild(repo, Some(base), pending)? {
        Some(oid) => Ok(TreeId::new(oid)),
        None => {
            let empty = repo.treebuilder(None)?.write()?;
            Ok(TreeId::new(empty))
        }
    }
}

/// returns `None` when the rebuilt tree would be empty
fn rebuild(
    repo: &Repository,
    base: Option<&Tree<'_>>,
    changes: Vec<(String, Option<git2::Oid>)>,
) -> HostResult<Option<git2::Oid>> {
    let mut builder = repo.treebuilder(base)?;
    // changes below this level, grouped by their first segment
    let mut nested: BTreeMap<String, Vec<(String, Option<git2::Oid>)>> = BTreeMap::new();

    for (path, blob) in changes {
        match path.split_once('/') {
            Some((dir, rest)) => nested
                .entry(dir.to_string())
                .or_default()
                .push((rest.to_string(), blob)),
            None => match blob {
                Some(oid) => {
                    builder.insert(path.as_str(), oid, FileMode::Blob.into())?;
                }
                None => {
                    if builder.get(path.as_str())?.is_some() {
                        builder.remove(path.as_str())?;
                    }
                }
            },
        }
    }

    for (dir, sub_changes) in nested {
        let existing = builder
            .get(dir.as_str())?
            .map(|entry| (entry.id(), entry.kind()));

        let sub_base = match existing {
            Some((id, Some(ObjectType::Tree))) => Some(repo.find_tree(id)?),
            // nothing lives beneath a file, so pure deletions there leave it alone
            Some(_) if sub_changes.iter().all(|(_, blob)| blob.is_none()) => continue,
            _ => None,
        };

        match rebuild(repo, sub_base.as_ref(), sub_changes)? {
            Some(oid) => {
                builder.insert(dir.as_str(), oid, FileMode::Tree.into())?;
            }
            None => {
                if existing.is_some() {
                    builder.remove(dir.as_str())?;
                }
            }
        }
    }

    if builder.len() == 0 {
        return Ok(None);
    }
    Ok(Some(builder.write()?))
}

/// an empty root tree for the first commit of a repository
pub fn create_initial_tree(repo: &Repository) -> HostResult<TreeId> {
    let oid = repo.treebuilder(None)?.write()?;
    Ok(TreeId::new(oid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::local::blob::write_blob;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    fn empty_tree(repo: &Repository) -> Tree<'_> {
        let id = create_initial_tree(repo).unwrap();
        repo.find_tree(id.raw()).unwrap()
    }

    #[test]
    fn test_apply_nested_upserts() {
        let (_dir, repo) = setup_repo();
        let base = empty_tree(&repo);
        let a = write_blob(&repo, b"a").unwrap();
        let b = write_blob(&repo, b"b").unwrap();

        let changes = vec![
            TreeChange::upsert("index.html", a),
            TreeChange::upsert("slides/deck1/slide.html", b),
            TreeChange::upsert("slides/theme.css", a),
        ];
        let tree_id = apply_changes(&repo, &base, &changes).unwrap();
        let tree = repo.find_tree(tree_id.raw()).unwrap();

        assert_eq!(lookup(&tree, "index.html").unwrap(), Some(PathEntry::Blob(a)));
        assert_eq!(
            lookup(&tree, "slides/deck1/slide.html").unwrap(),
            Some(PathEntry::Blob(b))
        );
        assert!(matches!(lookup(&tree, "slides").unwrap(), Some(PathEntry::Tree(_))));
        assert_eq!(lookup(&tree, "missing.txt").unwrap(), None);
    }

    #[test]
    fn test_apply_preserves_untouched_entries() {
        let (_dir, repo) = setup_repo();
        let base = empty_tree(&repo);
        let a = write_blob(&repo, b"a").unwrap();
        let b = write_blob(&repo, b"b").unwrap();

        let first = apply_changes(&repo, &base, &[TreeChange::upsert("pages/one.html", a)]).unwrap();
        let first = repo.find_tree(first.raw()).unwrap();
        let second = apply_changes(&repo, &first, &[TreeChange::upsert("pages/two.html", b)]).unwrap();
        let second = repo.find_tree(second.raw()).unwrap();

        assert_eq!(lookup(&second, "pages/one.html").unwrap(), Some(PathEntry::Blob(a)));
        assert_eq!(lookup(&second, "pages/two.html").unwrap(), Some(PathEntry::Blob(b)));
    }

    #[test]
    fn test_delete_drops_empty_folders() {
        let (_dir, repo) = setup_repo();
        let base = empty_tree(&repo);
        let a = write_blob(&repo, b"a").unwrap();

        let tree_id = apply_changes(
            &repo,
            &base,
            &[
                TreeChange::upsert("images/x/1.png", a),
                TreeChange::upsert("images/x/2.png", a),
                TreeChange::upsert("keep.txt", a),
            ],
        )
        .unwrap();
        let tree = repo.find_tree(tree_id.raw()).unwrap();

        let tree_id = apply_changes(
            &repo,
            &tree,
            &[TreeChange::delete("images/x/1.png"), TreeChange::delete("images/x/2.png")],
        )
        .unwrap();
        let tree = repo.find_tree(tree_id.raw()).unwrap();

        assert_eq!(lookup(&tree, "images").unwrap(), None);
        assert_eq!(lookup(&tree, "keep.txt").unwrap(), Some(PathEntry::Blob(a)));
    }

    #[test]
    fn test_delete_missing_path_is_noop() {
        let (_dir, repo) = setup_repo();
        let base = empty_tree(&repo);
        let a = write_blob(&repo, b"a").unwrap();
        let tree_id = apply_changes(&repo, &base, &[TreeChange::upsert("a.txt", a)]).unwrap();
        let tree = repo.find_tree(tree_id.raw()).unwrap();

        let after = apply_changes(
            &repo,
            &tree,
            &[TreeChange::delete("nope.txt"), TreeChange::delete("no/such/dir.txt")],
        )
        .unwrap();
        assert_eq!(after, tree_id);
    }

    #[test]
    fn test_delete_beneath_a_file_keeps_the_file() {
        let (_dir, repo) = setup_repo();
        let base = empty_tree(&repo);
        let a = write_blob(&repo, b"a").unwrap();
        let tree_id = apply_changes(&repo, &base, &[TreeChange::upsert("notes", a)]).unwrap();
        let tree = repo.find_tree(tree_id.raw()).unwrap();

        let after = apply_changes(&repo, &tree, &[TreeChange::delete("notes/x.txt")]).unwrap();
        let after = repo.find_tree(after.raw()).unwrap();

        assert_eq!(lookup(&after, "notes").unwrap(), Some(PathEntry::Blob(a)));
    }

    #[test]
    fn test_upsert_beneath_a_file_replaces_it_with_a_folder() {
        let (_dir, repo) = setup_repo();
        let base = empty_tree(&repo);
        let a = write_blob(&repo, b"a").unwrap();
        let tree_id = apply_changes(&repo, &base, &[TreeChange::upsert("notes", a)]).unwrap();
        let tree = repo.find_tree(tree_id.raw()).unwrap();

        let after = apply_changes(&repo, &tree, &[TreeChange::upsert("notes/x.txt", a)]).unwrap();
        let after = repo.find_tree(after.raw()).unwrap();

        assert_eq!(lookup(&after, "notes/x.txt").unwrap(), Some(PathEntry::Blob(a)));
    }

    #[test]
    fn test_list_entries() {
        let (_dir, repo) = setup_repo();
        let base = empty_tree(&repo);
        let a = write_blob(&repo, b"a").unwrap();
        let tree_id = apply_changes(
            &repo,
            &base,
            &[TreeChange::upsert("site/b.html", a), TreeChange::upsert("site/a/x.css", a)],
        )
        .unwrap();
        let tree = repo.find_tree(tree_id.raw()).unwrap();
        let site = match lookup(&tree, "site").unwrap() {
            Some(PathEntry::Tree(id)) => id,
            other => panic!("expected tree, got {:?}", other),
        };

        let entries = list_entries(&repo, site, "site").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[0].kind, EntryKind::Dir);
        assert_eq!(entries[1].path, "site/b.html");
        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[1].sha.to_string(), a.to_string());
    }
}
