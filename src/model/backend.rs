//! Passthrough model backend.
//!
//! The request is handed as JSON on stdin to an external adapter program
//! that owns the provider's wire format; whatever it prints on stdout is the
//! model's reply.

use super::{ModelRequest, ModelService};
use crate::subprocess::{ProcessCommandBuilder, ProcessRunner};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct CommandModelService {
    runner: Arc<dyn ProcessRunner>,
    command: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandModelService {
    pub fn new(runner: Arc<dyn ProcessRunner>, command: Vec<String>) -> Self {
        Self {
            runner,
            command,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl ModelService for CommandModelService {
    async fn generate(&self, request: ModelRequest) -> String {
        let Some(builder) = ProcessCommandBuilder::from_argv(&self.command) else {
            return "Error: no backend command configured".to_string();
        };

        let payload = match serde_json::to_string(&request) {
            Ok(payload) => payload,
            Err(e) => return format!("Error: failed to encode request: {}", e),
        };

        let command = builder
            .env("CMDPILOT_MODEL_ID", &request.model_id)
            .env("CMDPILOT_STAGE", request.stage.section_name())
            .maybe_timeout(self.timeout)
            .stdin(payload)
            .build();

        match self.runner.run(command).await {
            Ok(output) if output.status.success() => output.stdout.trim().to_string(),
            Ok(output) => {
                tracing::error!(
                    "Model backend failed for {} ({:?}): {}",
                    request.stage,
                    output.status,
                    output.stderr.trim()
                );
                format!("Error: model backend exited with {:?}", output.status)
            }
            Err(e) => {
                tracing::error!("Model backend request failed for {}: {}", request.stage, e);
                format!("Error: {}", e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, StageRole};
    use crate::subprocess::MockProcessRunner;

    fn request() -> ModelRequest {
        ModelRequest {
            stage: StageRole::Stepper,
            model_id: "gemini-2.0-flash".to_string(),
            api_key: "secret".to_string(),
            history: vec![Message::user("context")],
            input: "list files".to_string(),
        }
    }

    #[tokio::test]
    async fn test_reply_is_trimmed_stdout() {
        let mock = MockProcessRunner::new();
        mock.on("backend")
            .stdout("  {\"steps\":[]}\n")
            .install();

        let service = CommandModelService::new(Arc::new(mock.clone()), vec!["backend".to_string()]);
        assert_eq!(service.generate(request()).await, "{\"steps\":[]}");

        let call = &mock.calls()[0];
        let sent: serde_json::Value =
            serde_json::from_str(call.stdin.as_deref().unwrap()).unwrap();
        assert_eq!(sent["input"], "list files");
        assert_eq!(sent["api_key"], "secret");
        assert_eq!(call.env["CMDPILOT_STAGE"], "QueryStepper");
    }

    #[tokio::test]
    async fn test_failures_become_error_text() {
        let mock = MockProcessRunner::new();
        mock.on("backend").exit_code(2).install();
        let service = CommandModelService::new(Arc::new(mock), vec!["backend".to_string()]);
        assert!(service.generate(request()).await.starts_with("Error:"));

        let missing = MockProcessRunner::new();
        missing.on("backend").not_found().install();
        let service = CommandModelService::new(Arc::new(missing), vec!["backend".to_string()]);
        assert!(service.generate(request()).await.starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let service = CommandModelService::new(Arc::new(MockProcessRunner::new()), Vec::new());
        assert!(service.generate(request()).await.starts_with("Error:"));
    }
}
