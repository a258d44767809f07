use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::subprocess::ProcessCommand;

/// Fluent construction of a [`ProcessCommand`].
#[derive(Debug, Clone)]
pub struct ProcessCommandBuilder {
    command: ProcessCommand,
}

impl ProcessCommandBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            command: ProcessCommand {
                program: program.into(),
                args: Vec::new(),
                env: HashMap::new(),
                working_dir: None,
                timeout: None,
                stdin: None,
            },
        }
    }

    /// Start from an argv list such as the configured privilege program
    /// (`["su", "-c"]`). `None` when the list is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, leading) = argv.split_first()?;
        Some(Self::new(program.as_str()).args(leading))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.command.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.command.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.maybe_timeout(Some(timeout))
    }

    pub fn maybe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command.timeout = timeout;
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.command.stdin = Some(input.into());
        self
    }

    pub fn build(self) -> ProcessCommand {
        self.command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_argv() {
        let privilege = vec!["sudo".to_string(), "sh".to_string(), "-c".to_string()];
        let command = ProcessCommandBuilder::from_argv(&privilege)
            .unwrap()
            .arg("id")
            .build();
        assert_eq!(command.program, "sudo");
        assert_eq!(command.args, vec!["sh", "-c", "id"]);

        assert!(ProcessCommandBuilder::from_argv(&[]).is_none());
    }
}
