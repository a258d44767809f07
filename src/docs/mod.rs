//! Documentation lookup for pipeline tags.
//!
//! A tag such as `ImageMagick` maps to `<knowledge_base>/imagemagick.md`.
//! Every failure is local to the tag: the caller gets `None` and the rest of
//! the step still resolves.

use crate::access::FileAccessor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

pub struct DocumentationResolver {
    root: PathBuf,
    accessor: Arc<dyn FileAccessor>,
}

impl DocumentationResolver {
    pub fn new(root: impl Into<PathBuf>, accessor: Arc<dyn FileAccessor>) -> Self {
        Self {
            root: root.into(),
            accessor,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical file name for a tag: lower-cased, with a `.md` suffix
    pub fn canonical_file_name(tag: &str) -> Option<String> {
        let normalized = tag.trim().to_lowercase();
        if normalized.is_empty()
            || normalized.contains('/')
            || normalized.contains('\\')
            || normalized.starts_with('.')
        {
            return None;
        }
        Some(format!("{normalized}.md"))
    }

    /// Documentation text for a tag, or `None` when it cannot be resolved.
    pub async fn resolve(&self, tag: &str) -> Option<String> {
        let Some(expected) = Self::canonical_file_name(tag) else {
            error!("DocConsistency: unusable tag [{}]", tag);
            return None;
        };
        let path = self.root.join(&expected);

        // Case-insensitive filesystems happily open `Ls.md` for `ls.md`, so
        // the literal entry name has to be checked before reading.
        match self.accessor.entry_name(&path).await {
            Ok(Some(actual)) if actual == expected => {}
            Ok(Some(actual)) => {
                error!(
                    "DocConsistency: mismatch for tag [{}]: expected [{}], found [{}]",
                    tag, expected, actual
                );
                return None;
            }
            Ok(None) => {
                error!("DocConsistency: file not found: {}", path.display());
                return None;
            }
            Err(e) => {
                error!(
                    "DocConsistency: cannot inspect {}: {}",
                    self.root.display(),
                    e
                );
                return None;
            }
        }

        match self.accessor.read(&path).await {
            Ok(text) => {
                debug!("Resolved documentation for [{}] ({} bytes)", tag, text.len());
                Some(text)
            }
            Err(e) => {
                error!("DocConsistency: failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Resolve each tag in order, keeping only those that resolved.
    pub async fn resolve_all<'a, I>(&self, tags: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut docs = Vec::new();
        for tag in tags {
            if let Some(text) = self.resolve(tag).await {
                docs.push(text);
            }
        }
        docs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{LocalFileAccessor, MemoryFileAccessor};
    use tempfile::TempDir;

    fn resolver(accessor: MemoryFileAccessor) -> DocumentationResolver {
        DocumentationResolver::new("/kb", Arc::new(accessor))
    }

    #[tokio::test]
    async fn test_resolve_lowercases_tag() {
        let resolver = resolver(MemoryFileAccessor::new().with_file("/kb/ls.md", "list files"));
        assert_eq!(resolver.resolve("LS").await.as_deref(), Some("list files"));
    }

    #[tokio::test]
    async fn test_resolve_missing_tag() {
        let resolver = resolver(MemoryFileAccessor::new());
        assert!(resolver.resolve("tar").await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_rejects_case_mismatch() {
        let resolver = resolver(MemoryFileAccessor::new().with_file("/kb/Tar.md", "archive"));
        assert!(resolver.resolve("tar").await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_rejects_path_like_tags() {
        let resolver = resolver(MemoryFileAccessor::new().with_file("/etc.md", "nope"));
        assert!(resolver.resolve("../etc").await.is_none());
        assert!(resolver.resolve("  ").await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_all_never_longer_than_tags() {
        let resolver = resolver(
            MemoryFileAccessor::new()
                .with_file("/kb/ls.md", "L")
                .with_file("/kb/cp.md", "C"),
        );
        let tags = ["ls", "missing", "cp", "Mv"];
        let docs = resolver.resolve_all(tags).await;
        assert_eq!(docs, vec!["L".to_string(), "C".to_string()]);
        assert!(docs.len() <= tags.len());
    }

    #[tokio::test]
    async fn test_resolve_on_real_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("grep.md"), "search text").unwrap();
        let resolver = DocumentationResolver::new(temp.path(), Arc::new(LocalFileAccessor::new()));

        assert_eq!(
            resolver.resolve("Grep").await.as_deref(),
            Some("search text")
        );
    }

    #[tokio::test]
    async fn test_resolve_with_missing_root() {
        let resolver = DocumentationResolver::new(
            "/definitely/not/a/knowledge/base",
            Arc::new(LocalFileAccessor::new()),
        );
        assert!(resolver.resolve("ls").await.is_none());
    }
}
