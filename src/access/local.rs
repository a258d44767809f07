use super::FileAccessor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::fs;

/// Reads and writes with the invoking user's permissions
#[derive(Debug, Default, Clone)]
pub struct LocalFileAccessor;

impl LocalFileAccessor {
    pub fn new() -> Self {
        Self
    }
}

fn not_found_or_io(path: &Path, error: std::io::Error) -> Error {
    if error.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(path.display().to_string())
    } else {
        Error::Io(error)
    }
}

#[async_trait]
impl FileAccessor for LocalFileAccessor {
    async fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .await
            .map_err(|e| not_found_or_io(path, e))
    }

    async fn write(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path, contents).await?;
        Ok(())
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| not_found_or_io(dir, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}
