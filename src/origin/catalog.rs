//! Object catalogs served by the origin.

use super::{ObjectSource, OriginReply};
use crate::proxy::error::ProxyError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// The authoritative key to content mapping.
#[derive(Debug, Clone)]
pub enum Catalog {
    /// One flat file per key inside a directory.
    Directory(PathBuf),
    /// Fixed in-memory objects.
    Memory(HashMap<String, Bytes>),
}

impl Catalog {
    /// Build an in-memory catalog from key/content pairs.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        Catalog::Memory(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Look up the content for `key`.
    ///
    /// Directory catalogs only resolve keys naming a single file directly
    /// inside the directory; anything with a path separator or a `.`/`..`
    /// component is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if an existing file cannot be read.
    pub async fn get(&self, key: &str) -> io::Result<Option<Bytes>> {
        match self {
            Catalog::Memory(objects) => Ok(objects.get(key).cloned()),
            Catalog::Directory(root) => {
                let Some(path) = resolve(root, key) else {
                    trace!("Rejecting non-flat key '{}'", key);
                    return Ok(None);
                };
                match tokio::fs::metadata(&path).await {
                    Ok(meta) if meta.is_file() => {}
                    Ok(_) => return Ok(None),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e),
                }
                match tokio::fs::read(&path).await {
                    Ok(content) => Ok(Some(Bytes::from(content))),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

fn resolve(root: &Path, key: &str) -> Option<PathBuf> {
    if key.contains(['/', '\\', '\0']) {
        return None;
    }
    let mut components = Path::new(key).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Some(root.join(name)),
        _ => None,
    }
}

#[async_trait]
impl ObjectSource for Catalog {
    async fn fetch(&self, key: &str) -> Result<OriginReply, ProxyError> {
        Ok(match self.get(key).await? {
            Some(content) => OriginReply::Found(content),
            None => OriginReply::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_catalog() {
        let catalog = Catalog::from_entries([("hello.txt", Bytes::from_static(b"hi there"))]);
        assert_eq!(
            catalog.get("hello.txt").await.unwrap(),
            Some(Bytes::from_static(b"hi there"))
        );
        assert_eq!(catalog.get("missing.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_directory_catalog() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi there").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let catalog = Catalog::Directory(dir.path().to_path_buf());

        assert_eq!(
            catalog.get("hello.txt").await.unwrap(),
            Some(Bytes::from_static(b"hi there"))
        );
        assert_eq!(catalog.get("missing.txt").await.unwrap(), None);
        assert_eq!(catalog.get("subdir").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_directory_catalog_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("objects");
        std::fs::create_dir(&inner).unwrap();
        std::fs::write(dir.path().join("outside.txt"), "nope").unwrap();
        let catalog = Catalog::Directory(inner);

        for key in ["../outside.txt", "..", ".", "/etc/passwd", "a/b", "a\\b"] {
            assert_eq!(catalog.get(key).await.unwrap(), None, "key {:?}", key);
        }
    }

    #[tokio::test]
    async fn test_catalog_as_object_source() {
        let catalog = Catalog::from_entries([("a.txt", "A")]);
        assert_eq!(
            catalog.fetch("a.txt").await.unwrap(),
            OriginReply::Found(Bytes::from_static(b"A"))
        );
        assert_eq!(catalog.fetch("b.txt").await.unwrap(), OriginReply::NotFound);
    }
}
