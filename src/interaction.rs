//! Terminal prompts for questions the pipeline asks the user.

use crate::error::Result;
use async_trait::async_trait;
use std::io::{self, BufRead, Write};

#[async_trait]
pub trait UserPrompter: Send + Sync {
    /// Prompt for yes/no confirmation
    async fn prompt_yes_no(&self, message: &str) -> Result<bool>;

    /// Prompt for free text; an empty answer yields `default` when given
    async fn prompt_text(&self, message: &str, default: Option<&str>) -> Result<String>;
}

/// Prompter on stdin/stdout
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }

    fn read_line() -> Result<String> {
        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    /// Empty input counts as yes
    pub fn parse_yes_no(input: &str) -> bool {
        let input = input.trim().to_lowercase();
        input.is_empty() || input == "y" || input == "yes"
    }

    pub fn format_text_prompt(message: &str, default: Option<&str>) -> String {
        match default {
            Some(default) => format!("{message} [{default}]: "),
            None => format!("{message}: "),
        }
    }
}

#[async_trait]
impl UserPrompter for TerminalPrompter {
    async fn prompt_yes_no(&self, message: &str) -> Result<bool> {
        print!("{message} [Y/n]: ");
        io::stdout().flush()?;

        let input = tokio::task::spawn_blocking(Self::read_line)
            .await
            .map_err(|e| crate::error::Error::Other(e.to_string()))??;
        Ok(Self::parse_yes_no(&input))
    }

    async fn prompt_text(&self, message: &str, default: Option<&str>) -> Result<String> {
        print!("{}", Self::format_text_prompt(message, default));
        io::stdout().flush()?;

        let input = tokio::task::spawn_blocking(Self::read_line)
            .await
            .map_err(|e| crate::error::Error::Other(e.to_string()))??;
        if input.is_empty() {
            Ok(default.map(str::to_string).unwrap_or(input))
        } else {
            Ok(input)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    pub struct MockPrompter {
        responses: Mutex<Vec<String>>,
    }

    impl MockPrompter {
        pub fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }

        fn next(&self) -> Result<String> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| Error::Other("No mock response available".to_string()))
        }
    }

    #[async_trait]
    impl UserPrompter for MockPrompter {
        async fn prompt_yes_no(&self, _message: &str) -> Result<bool> {
            Ok(TerminalPrompter::parse_yes_no(&self.next()?))
        }

        async fn prompt_text(&self, _message: &str, default: Option<&str>) -> Result<String> {
            let response = self.next()?;
            if response.is_empty() {
                Ok(default.unwrap_or_default().to_string())
            } else {
                Ok(response)
            }
        }
    }

    #[test]
    fn test_parse_yes_no() {
        assert!(TerminalPrompter::parse_yes_no(""));
        assert!(TerminalPrompter::parse_yes_no("Y"));
        assert!(TerminalPrompter::parse_yes_no(" yes "));
        assert!(!TerminalPrompter::parse_yes_no("n"));
        assert!(!TerminalPrompter::parse_yes_no("sure"));
    }

    #[test]
    fn test_format_text_prompt() {
        assert_eq!(
            TerminalPrompter::format_text_prompt("Folder", Some("/sdcard")),
            "Folder [/sdcard]: "
        );
        assert_eq!(TerminalPrompter::format_text_prompt("Folder", None), "Folder: ");
    }

    #[tokio::test]
    async fn test_mock_prompter() {
        let prompter = MockPrompter::new(vec!["".to_string(), "n".to_string()]);

        // Responses are popped from the back
        assert!(!prompter.prompt_yes_no("Run?").await.unwrap());
        assert_eq!(
            prompter.prompt_text("Folder", Some("/home")).await.unwrap(),
            "/home"
        );
        assert!(prompter.prompt_yes_no("Again?").await.is_err());
    }
}
