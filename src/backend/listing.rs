//! One-level directory views over flat key spaces.

use super::{storage_key::key_name, BackendClient, BackendResult, ListPage, ListRequest, ObjectMeta};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

/// Lists everything under `prefix`, following continuation cursors until the
/// backend reports the end.
#[instrument(level = "debug", skip(client))]
pub async fn list_all(
    client: &dyn BackendClient,
    prefix: &str,
    delimiter: Option<&str>,
) -> BackendResult<ListPage> {
    let mut request = ListRequest::new(prefix, delimiter);
    let mut result = ListPage::default();
    let mut pages = 0;
    loop {
        let page = client.list_page(&request).await?;
        pages += 1;
        result.common_prefixes.extend(page.common_prefixes);
        result.objects.extend(page.objects);
        match page.next_continuation {
            Some(next) => request.continuation = Some(next),
            None => break,
        }
    }
    debug!(
        pages,
        objects = result.objects.len(),
        prefixes = result.common_prefixes.len()
    );
    Ok(result)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub meta: ObjectMeta,
}

/// Children of one directory prefix with the markers filtered out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryListing {
    pub folders: BTreeSet<String>,
    pub files: Vec<FileEntry>,
    /// The directory's own marker object was seen.
    pub marker_present: bool,
}

impl DirectoryListing {
    pub fn build(prefix: &str, page: ListPage) -> Self {
        let mut listing = DirectoryListing::default();

        for p in page.common_prefixes {
            let name = p
                .strip_prefix(prefix)
                .unwrap_or(&p)
                .trim_end_matches('/');
            if !name.is_empty() {
                listing.folders.insert(name.to_owned());
            }
        }

        for object in page.objects {
            if object.key == prefix && prefix.ends_with('/') {
                listing.marker_present = true;
                continue;
            }
            let rest = object.key.strip_prefix(prefix).unwrap_or(&object.key);
            if object.is_directory_marker() {
                let name = rest.trim_end_matches('/');
                if !name.is_empty() && !name.contains('/') {
                    listing.folders.insert(name.to_owned());
                }
                continue;
            }
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            listing.files.push(FileEntry {
                name: key_name(&object.key).to_owned(),
                meta: object,
            });
        }

        listing.files.sort_by(|a, b| a.name.cmp(&b.name));
        listing
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }
}

pub async fn list_directory(
    client: &dyn BackendClient,
    prefix: &str,
) -> BackendResult<DirectoryListing> {
    let page = list_all(client, prefix, Some("/")).await?;
    Ok(DirectoryListing::build(prefix, page))
}

/// Every key under `prefix`, markers included.
pub async fn list_recursive(client: &dyn BackendClient, prefix: &str) -> BackendResult<Vec<String>> {
    let page = list_all(client, prefix, None).await?;
    Ok(page.objects.into_iter().map(|o| o.key).collect())
}

/// True when at least one key lives under `prefix`.
pub async fn prefix_exists(client: &dyn BackendClient, prefix: &str) -> BackendResult<bool> {
    let request = ListRequest {
        max_keys: Some(1),
        ..ListRequest::new(prefix, None)
    };
    let page = client.list_page(&request).await?;
    Ok(!page.objects.is_empty() || !page.common_prefixes.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn meta(key: &str, size: u64) -> ObjectMeta {
        ObjectMeta::new(key, size)
    }

    #[test]
    fn markers_are_not_files() {
        let page = ListPage {
            common_prefixes: vec!["data/files/sub/".into()],
            objects: vec![
                meta("data/files/", 0),
                meta("data/files/empty/", 0),
                meta("data/files/a.txt", 3),
            ],
            next_continuation: None,
        };
        let listing = DirectoryListing::build("data/files/", page);
        assert!(listing.marker_present);
        assert_eq!(
            listing.folders.into_iter().collect::<Vec<_>>(),
            vec!["empty".to_owned(), "sub".to_owned()]
        );
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "a.txt");
        assert_eq!(listing.files[0].meta.size, 3);
    }

    #[test]
    fn bucket_root_listing() {
        let page = ListPage {
            common_prefixes: vec!["docs/".into()],
            objects: vec![meta("readme.md", 10)],
            next_continuation: None,
        };
        let listing = DirectoryListing::build("", page);
        assert!(!listing.marker_present);
        assert!(listing.folders.contains("docs"));
        assert_eq!(listing.files[0].name, "readme.md");
    }

    #[tokio::test]
    async fn follows_continuations() {
        let backend = MemoryBackend::new().with_page_size(3);
        for i in 0..10 {
            backend.insert(&format!("p/{:02}", i), "x");
        }
        backend.insert("p/", "");
        backend.insert("q", "x");

        let keys = list_recursive(&backend, "p/").await.unwrap();
        assert_eq!(keys.len(), 11);
        let listing = list_directory(&backend, "p/").await.unwrap();
        assert!(listing.marker_present);
        assert_eq!(listing.files.len(), 10);

        assert!(prefix_exists(&backend, "p/").await.unwrap());
        assert!(!prefix_exists(&backend, "r/").await.unwrap());
    }
}
