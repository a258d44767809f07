use super::{conversation, Message, ModelRequest, ModelService, StageRole};
use crate::access::FileAccessor;
use crate::config::StageSettings;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    pub role: StageRole,
    pub api_key: String,
    pub model_id: String,
    pub context_files: Vec<PathBuf>,
    pub import_context: bool,
}

impl StageConfig {
    pub fn for_role(role: StageRole) -> Self {
        Self {
            role,
            api_key: String::new(),
            model_id: role.default_model_id().to_string(),
            context_files: Vec::new(),
            import_context: true,
        }
    }

    pub fn from_settings(role: StageRole, settings: &StageSettings) -> Self {
        let model_id = if settings.model_id.trim().is_empty() {
            role.default_model_id().to_string()
        } else {
            settings.model_id.clone()
        };
        Self {
            role,
            api_key: settings.api_key.clone(),
            model_id,
            context_files: settings.context_files.clone(),
            import_context: settings.import_context,
        }
    }
}

/// One model-backed pipeline stage and the conversation it owns.
pub struct Stage {
    config: StageConfig,
    history: Vec<Message>,
    service: Arc<dyn ModelService>,
    timeout: Option<Duration>,
}

impl Stage {
    pub fn new(role: StageRole, service: Arc<dyn ModelService>) -> Self {
        Self {
            config: StageConfig::for_role(role),
            history: Vec::new(),
            service,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn role(&self) -> StageRole {
        self.config.role
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Apply stage settings and preload context files as `user` turns.
    ///
    /// Unreadable context files are skipped with a warning.
    pub async fn initialize(&mut self, config: StageConfig, accessor: &dyn FileAccessor) {
        self.config = config;
        debug!(
            "Initializing {} with model {}",
            self.config.role, self.config.model_id
        );

        if !self.config.import_context {
            return;
        }

        for path in &self.config.context_files {
            match accessor.read(path).await {
                Ok(text) => {
                    self.history.push(Message::user(text));
                    debug!("{}: context loaded from {}", self.config.role, path.display());
                }
                Err(e) => {
                    warn!(
                        "{}: failed to load context from {}: {}",
                        self.config.role,
                        path.display(),
                        e
                    );
                }
            }
        }
    }

    /// Send one input and return the model's reply.
    ///
    /// The input is recorded before the call; the reply is recorded when one
    /// arrives. A missed deadline yields an empty reply and no model turn.
    pub async fn send(&mut self, input: &str) -> String {
        info!("→ Sending to {} [{}]", self.config.role, self.config.model_id);
        trace!("{} input: {}", self.config.role, input);

        let request = ModelRequest {
            stage: self.config.role,
            model_id: self.config.model_id.clone(),
            api_key: self.config.api_key.clone(),
            history: self.history.clone(),
            input: input.to_string(),
        };
        self.history.push(Message::user(input));

        let reply = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.service.generate(request)).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!("{} did not answer within {:?}", self.config.role, limit);
                    return String::new();
                }
            },
            None => self.service.generate(request).await,
        };

        self.history.push(Message::model(reply.clone()));
        debug!("← Response from {}: {} bytes", self.config.role, reply.len());
        trace!("{} reply: {}", self.config.role, reply);
        reply
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Write the conversation as `[role] content` lines.
    pub async fn export_history(&self, accessor: &dyn FileAccessor, path: &Path) -> Result<()> {
        accessor
            .write(path, &conversation::export(&self.history))
            .await
    }

    /// Replace the conversation with the transcript at `path`.
    pub async fn import_history(&mut self, accessor: &dyn FileAccessor, path: &Path) -> Result<()> {
        let text = accessor.read(path).await?;
        self.history = conversation::import(&text);
        Ok(())
    }
}
