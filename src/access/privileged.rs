use super::FileAccessor;
use crate::error::{Error, Result};
use crate::subprocess::{ProcessCommandBuilder, ProcessOutput, ProcessRunner};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Performs file operations through the privilege-escalation program
/// (`su -c` by default).
pub struct PrivilegedFileAccessor {
    runner: Arc<dyn ProcessRunner>,
    privilege: Vec<String>,
    timeout: Option<Duration>,
}

impl PrivilegedFileAccessor {
    pub fn new(runner: Arc<dyn ProcessRunner>, privilege: Vec<String>) -> Self {
        Self {
            runner,
            privilege,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run_script(&self, script: &str, stdin: Option<String>) -> Result<ProcessOutput> {
        let Some(builder) = ProcessCommandBuilder::from_argv(&self.privilege) else {
            return Err(Error::Config("privilege command is empty".to_string()));
        };

        let mut builder = builder.arg(script).maybe_timeout(self.timeout);
        if let Some(input) = stdin {
            builder = builder.stdin(input);
        }

        Ok(self.runner.run(builder.build()).await?)
    }

    fn quoted(path: &Path) -> String {
        shell_words::quote(&path.to_string_lossy()).into_owned()
    }

    fn failure(path: &Path, output: &ProcessOutput) -> Error {
        let stderr = output.stderr.trim();
        tracing::error!("Privileged access to {} failed: {}", path.display(), stderr);
        if stderr.contains("No such file") {
            Error::NotFound(path.display().to_string())
        } else {
            Error::Other(format!(
                "privileged access to {} failed ({:?}): {}",
                path.display(),
                output.status,
                stderr
            ))
        }
    }
}

#[async_trait]
impl FileAccessor for PrivilegedFileAccessor {
    async fn read(&self, path: &Path) -> Result<String> {
        let output = self
            .run_script(&format!("cat -- {}", Self::quoted(path)), None)
            .await?;
        if !output.status.success() {
            return Err(Self::failure(path, &output));
        }
        Ok(output.stdout)
    }

    async fn write(&self, path: &Path, contents: &str) -> Result<()> {
        let output = self
            .run_script(
                &format!("cat > {}", Self::quoted(path)),
                Some(contents.to_string()),
            )
            .await?;
        if !output.status.success() {
            return Err(Self::failure(path, &output));
        }
        Ok(())
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let output = self
            .run_script(&format!("ls -1a -- {}", Self::quoted(dir)), None)
            .await?;
        if !output.status.success() {
            return Err(Self::failure(dir, &output));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim_end)
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .map(str::to_string)
            .collect())
    }
}
