//! Hand-off of a verified payload to the session executor.

use crate::error::Result;
use crate::executor::{ExecutionReport, SessionExecutor};
use serde_json::Value;
use tracing::{debug, info};

/// Pure: Command lines of a verified payload, in execution order.
///
/// `consolidated_commands[].commands` already cover the steps, so they are
/// used alone whenever they yield anything; `steps[].command` is the fallback.
/// Missing arrays, non-string values and blank commands are skipped.
pub fn extract_commands(payload: &Value) -> Vec<String> {
    let field = |array: &str, key: &str| -> Vec<String> {
        payload
            .get(array)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|item| item.get(key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .map(str::to_string)
            .collect()
    };

    let consolidated = field("consolidated_commands", "commands");
    if consolidated.is_empty() {
        field("steps", "command")
    } else {
        consolidated
    }
}

/// Runs the commands of a verified payload one after another.
pub struct CommandSink {
    executor: SessionExecutor,
}

impl CommandSink {
    pub fn new(executor: SessionExecutor) -> Self {
        Self { executor }
    }

    /// Parse `payload` and run each extracted command unprivileged in the
    /// executor's current environment, waiting for each before the next.
    pub async fn run(&self, payload: &str) -> Result<Vec<ExecutionReport>> {
        let payload: Value = serde_json::from_str(payload)?;
        let commands = extract_commands(&payload);
        info!("Executing {} command(s) from verified payload", commands.len());

        let mut reports = Vec::with_capacity(commands.len());
        for command in &commands {
            debug!("Running: {}", command);
            reports.push(self.executor.run(command, false).await);
        }
        Ok(reports)
    }
}
