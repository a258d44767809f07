use super::FileAccessor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory file map for tests and dry runs
#[derive(Debug, Default, Clone)]
pub struct MemoryFileAccessor {
    files: Arc<Mutex<BTreeMap<PathBuf, String>>>,
}

impl MemoryFileAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: impl AsRef<Path>, contents: &str) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&self, path: impl AsRef<Path>, contents: &str) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.as_ref().to_path_buf(), contents.to_string());
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path.as_ref())
            .cloned()
    }
}

#[async_trait]
impl FileAccessor for MemoryFileAccessor {
    async fn read(&self, path: &Path) -> Result<String> {
        self.get(path)
            .ok_or_else(|| Error::NotFound(path.display().to_string()))
    }

    async fn write(&self, path: &Path, contents: &str) -> Result<()> {
        self.insert(path, contents);
        Ok(())
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }
}
