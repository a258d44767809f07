//! Runtime settings.
//!
//! Settings come from a TOML file (`--config`, or `config.toml` in the
//! platform config directory), fall back to defaults for anything missing,
//! and finally take `CMDPILOT_*` environment overrides.

pub mod stage_config;

pub use stage_config::{StageSettings, StageSettingsMap};

use crate::error::{Error, Result};
use crate::executor::ExecutionEnvironment;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_KNOWLEDGE_BASE: &str =
    "/storage/emulated/0/Documents/Obsidian_Live/_KnowledgeBase/DataFiles/Documentation";
const DEFAULT_MODEL_CONFIG: &str =
    "/storage/emulated/0/Documents/Obsidian_Live/_KnowledgeBase/DataFiles/ModelConfigAndroid.md";

/// Platform config directory for cmdpilot
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "cmdpilot", "cmdpilot").map(|dirs| dirs.config_dir().to_path_buf())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Directory holding `<tag>.md` documentation files
    pub knowledge_base: PathBuf,
    /// Markdown file with per-stage model settings
    pub model_config: PathBuf,
    /// Program and arguments of the model backend adapter
    pub backend_command: Vec<String>,
    pub stage_timeout_secs: u64,
    pub max_verification_retries: u32,
    pub retry_backoff_ms: u64,
    /// Read documentation and context files through the privilege program
    pub privileged_files: bool,
    pub executor: ExecutorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Unprivileged shell, invoked as `<shell> -c <command>`
    pub shell: String,
    /// Privilege program and its leading arguments, e.g. `["su", "-c"]`
    pub privilege: Vec<String>,
    pub chroot_dir: PathBuf,
    /// Login shell inside the chroot
    pub isolated_shell: String,
    /// Bootstrap script, relative to `chroot_dir`
    pub boot_script: String,
    pub default_environment: ExecutionEnvironment,
    /// Directory to enter once the isolated environment is booted
    pub initial_directory: Option<String>,
    pub command_timeout_secs: u64,
    /// Limit for the bootstrap script; 0 lets it run unbounded
    pub boot_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            knowledge_base: PathBuf::from(DEFAULT_KNOWLEDGE_BASE),
            model_config: PathBuf::from(DEFAULT_MODEL_CONFIG),
            backend_command: vec!["cmdpilot-backend".to_string()],
            stage_timeout_secs: 120,
            max_verification_retries: 3,
            retry_backoff_ms: 500,
            privileged_files: true,
            executor: ExecutorSettings::default(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            privilege: vec!["su".to_string(), "-c".to_string()],
            chroot_dir: PathBuf::from("/data/local/debian"),
            isolated_shell: "/bin/bash".to_string(),
            boot_script: "boot-debian.sh".to_string(),
            default_environment: ExecutionEnvironment::Direct,
            initial_directory: None,
            command_timeout_secs: 300,
            boot_timeout_secs: 600,
        }
    }
}

impl Settings {
    /// Load settings from an explicit path, or from the platform config
    /// directory when `path` is `None`.
    ///
    /// An explicit path must exist; the implicit one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match config_dir().map(|dir| dir.join("config.toml")) {
                Some(default_path) if default_path.exists() => Self::from_file(&default_path)?,
                _ => {
                    tracing::debug!("No settings file found, using defaults");
                    Self::default()
                }
            },
        };

        settings.merge_env_vars(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read settings {}: {}", path.display(), e))
        })?;
        let settings = Self::from_toml(&content)?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `CMDPILOT_*` overrides using the given lookup.
    pub fn merge_env_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CMDPILOT_KNOWLEDGE_BASE") {
            self.knowledge_base = PathBuf::from(path);
        }
        if let Some(path) = lookup("CMDPILOT_MODEL_CONFIG") {
            self.model_config = PathBuf::from(path);
        }
        if let Some(value) = lookup("CMDPILOT_MAX_RETRIES") {
            match value.trim().parse() {
                Ok(retries) => self.max_verification_retries = retries,
                Err(_) => tracing::warn!("Ignoring invalid CMDPILOT_MAX_RETRIES: {}", value),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend_command.is_empty() {
            return Err(Error::Config("backend_command must not be empty".to_string()));
        }
        if self.executor.privilege.is_empty() {
            return Err(Error::Config(
                "executor.privilege must not be empty".to_string(),
            ));
        }
        if self.executor.shell.trim().is_empty() {
            return Err(Error::Config("executor.shell must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl ExecutorSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn boot_timeout(&self) -> Option<Duration> {
        (self.boot_timeout_secs > 0).then(|| Duration::from_secs(self.boot_timeout_secs))
    }

    pub fn boot_script_path(&self) -> PathBuf {
        self.chroot_dir.join(&self.boot_script)
    }
}
