//! File access abstraction.
//!
//! Documentation lookup and stage context loading read files that usually
//! live outside the invoking user's permissions, so production builds go
//! through [`PrivilegedFileAccessor`]. [`LocalFileAccessor`] is the plain
//! variant and [`MemoryFileAccessor`] backs tests.

pub mod local;
pub mod memory;
pub mod privileged;

pub use local::LocalFileAccessor;
pub use memory::MemoryFileAccessor;
pub use privileged::PrivilegedFileAccessor;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait FileAccessor: Send + Sync {
    /// Read the whole file as text
    async fn read(&self, path: &Path) -> Result<String>;

    /// Replace the file's contents
    async fn write(&self, path: &Path, contents: &str) -> Result<()>;

    /// Names of the entries in a directory
    async fn list_dir(&self, dir: &Path) -> Result<Vec<String>>;

    /// Literal on-disk name of the entry `path` resolves to.
    ///
    /// The parent directory is searched case-insensitively, so on a
    /// case-insensitive filesystem `Ls.md` is reported for a lookup of
    /// `ls.md`. Returns `None` when nothing matches.
    async fn entry_name(&self, path: &Path) -> Result<Option<String>> {
        let (Some(parent), Some(wanted)) = (path.parent(), path.file_name()) else {
            return Ok(None);
        };
        let wanted = wanted.to_string_lossy();

        let entries = self.list_dir(parent).await?;
        if let Some(exact) = entries.iter().find(|name| **name == *wanted) {
            return Ok(Some(exact.clone()));
        }
        Ok(entries
            .into_iter()
            .find(|name| name.eq_ignore_ascii_case(&wanted)))
    }
}
