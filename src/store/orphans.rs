//! Unused image detection.
//!
//! An image counts as referenced when its file name or its full path shows
//! up anywhere in the given content as a plain substring. This is a
//! deliberate approximation: content that builds asset URLs indirectly will
//! make images look unused, and a name that merely appears in text will make
//! an image look used.

use serde::Serialize;

use crate::host::{EntryKind, RepositoryIdentity};
use crate::store::error::StoreResult;
use crate::store::ContentStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedImage {
    pub name: String,
    pub path: String,
    pub url: String,
}

impl ContentStore {
    /// Images directly inside `images_folder` that `content` never mentions.
    pub async fn find_orphaned_images(
        &self,
        identity: &RepositoryIdentity,
        images_folder: &str,
        content: &str,
    ) -> StoreResult<Vec<OrphanedImage>> {
        let limits = &self.inner.settings.uploads;
        let entries = self.list_folder(identity, images_folder, true).await?;

        let orphans = entries
            .into_iter()
            .filter(|e| e.kind == EntryKind::File && limits.is_image(&e.name))
            .filter(|e| !content.contains(e.name.as_str()) && !content.contains(e.path.as_str()))
            .map(|e| OrphanedImage {
                url: self.inner.host.content_url(identity, &self.inner.branch, &e.path),
                name: e.name,
                path: e.path,
            })
            .collect();
        Ok(orphans)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::batch::{BatchFile, BatchOptions};
    use crate::store::testutil::{identity, setup_store};

    #[tokio::test]
    async fn reports_only_unreferenced_images() {
        let (_dir, store, _) = setup_store();
        let id = identity();
        store
            .upload_batch(
                &id,
                vec![
                    BatchFile::new("images/a.png", "a"),
                    BatchFile::new("images/b.png", "b"),
                    BatchFile::new("images/notes.txt", "not an image"),
                    BatchFile::new("images/old/c.png", "nested"),
                ],
                BatchOptions::default(),
            )
            .await
            .unwrap();

        let html = r#"<img src="a.png"><p>hello</p>"#;
        let orphans = store.find_orphaned_images(&id, "images", html).await.unwrap();

        let names: Vec<&str> = orphans.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["b.png"]);
        assert_eq!(orphans[0].path, "images/b.png");
        assert!(orphans[0].url.ends_with("images/b.png"));
    }

    #[tokio::test]
    async fn full_path_reference_counts() {
        let (_dir, store, _) = setup_store();
        let id = identity();
        store
            .upload_batch(
                &id,
                vec![BatchFile::new("assets/logo.svg", "<svg/>")],
                BatchOptions::default(),
            )
            .await
            .unwrap();

        let css = "body { background: url(/assets/logo.svg) }";
        assert!(store.find_orphaned_images(&id, "assets", css).await.unwrap().is_empty());
        assert_eq!(store.find_orphaned_images(&id, "assets", "").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_folder_has_no_orphans() {
        let (_dir, store, _) = setup_store();
        let orphans = store.find_orphaned_images(&identity(), "images", "").await.unwrap();
        assert!(orphans.is_empty());
    }
}
