use crate::config::ExecutorSettings;
use crate::subprocess::{ProcessCommand, ProcessCommandBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionEnvironment {
    /// The host shell
    Direct,
    /// The chroot, entered through the privilege program
    Isolated,
}

impl ExecutionEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionEnvironment::Direct => "direct",
            ExecutionEnvironment::Isolated => "isolated",
        }
    }
}

impl fmt::Display for ExecutionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(ExecutionEnvironment::Direct),
            "isolated" => Ok(ExecutionEnvironment::Isolated),
            other => Err(format!("unknown execution environment: {other}")),
        }
    }
}

/// Turns a prepared command line into the process that runs it.
pub trait ExecutionStrategy: Send + Sync {
    fn environment(&self) -> ExecutionEnvironment;

    fn build(&self, command_line: &str, privileged: bool) -> ProcessCommand;
}

/// `<shell> -c <line>`, or `<privilege...> <line>` when privileged.
#[derive(Debug, Clone)]
pub struct DirectStrategy {
    shell: String,
    privilege: Vec<String>,
    timeout: Option<Duration>,
}

impl DirectStrategy {
    pub fn new(shell: impl Into<String>, privilege: Vec<String>) -> Self {
        Self {
            shell: shell.into(),
            privilege,
            timeout: None,
        }
    }

    pub fn from_settings(settings: &ExecutorSettings) -> Self {
        Self {
            shell: settings.shell.clone(),
            privilege: settings.privilege.clone(),
            timeout: Some(settings.command_timeout()),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ExecutionStrategy for DirectStrategy {
    fn environment(&self) -> ExecutionEnvironment {
        ExecutionEnvironment::Direct
    }

    fn build(&self, command_line: &str, privileged: bool) -> ProcessCommand {
        let builder = privileged
            .then(|| ProcessCommandBuilder::from_argv(&self.privilege))
            .flatten()
            .unwrap_or_else(|| ProcessCommandBuilder::new(&self.shell).arg("-c"));
        builder
            .arg(command_line)
            .maybe_timeout(self.timeout)
            .build()
    }
}

/// `<privilege...> "chroot <dir> <shell> --login -c '<line>'"`.
///
/// Entering the chroot needs root, so the privileged flag is ignored.
#[derive(Debug, Clone)]
pub struct IsolatedStrategy {
    privilege: Vec<String>,
    chroot_dir: PathBuf,
    shell: String,
    timeout: Option<Duration>,
}

impl IsolatedStrategy {
    pub fn new(privilege: Vec<String>, chroot_dir: impl Into<PathBuf>, shell: impl Into<String>) -> Self {
        Self {
            privilege,
            chroot_dir: chroot_dir.into(),
            shell: shell.into(),
            timeout: None,
        }
    }

    pub fn from_settings(settings: &ExecutorSettings) -> Self {
        Self {
            privilege: settings.privilege.clone(),
            chroot_dir: settings.chroot_dir.clone(),
            shell: settings.isolated_shell.clone(),
            timeout: Some(settings.command_timeout()),
        }
    }

    /// The jump command handed to the privilege program
    pub fn chroot_line(&self, command_line: &str) -> String {
        format!(
            "chroot {} {} --login -c '{}'",
            self.chroot_dir.display(),
            self.shell,
            command_line.replace('\'', "'\\''")
        )
    }
}

impl ExecutionStrategy for IsolatedStrategy {
    fn environment(&self) -> ExecutionEnvironment {
        ExecutionEnvironment::Isolated
    }

    fn build(&self, command_line: &str, _privileged: bool) -> ProcessCommand {
        let line = self.chroot_line(command_line);
        ProcessCommandBuilder::from_argv(&self.privilege)
            .unwrap_or_else(|| ProcessCommandBuilder::new("su").arg("-c"))
            .arg(line)
            .maybe_timeout(self.timeout)
            .build()
    }
}

/// True when the command's first shell word is `cd`.
pub fn is_directory_change(command: &str) -> bool {
    let first = match shell_words::split(command) {
        Ok(words) => words.into_iter().next(),
        Err(_) => command.split_whitespace().next().map(str::to_string),
    };
    first.as_deref() == Some("cd")
}

/// Prefix the command with a jump into `working_directory`; directory changes
/// also print the resulting directory so it can be captured.
///
/// A tracked directory that no longer exists falls back to `/` and the
/// command still runs, so the session can always `cd` out of it.
pub fn wrap_isolated(working_directory: &str, command: &str, changes_directory: bool) -> String {
    let enter = format!(
        "cd {} 2>/dev/null || cd /",
        shell_words::quote(working_directory)
    );
    if changes_directory {
        format!("{enter}; {command} && pwd")
    } else {
        format!("{enter}; {command}")
    }
}

/// The last non-blank stdout line, trimmed.
pub fn captured_directory(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn privilege() -> Vec<String> {
        vec!["su".to_string(), "-c".to_string()]
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("Isolated".parse::<ExecutionEnvironment>(), Ok(ExecutionEnvironment::Isolated));
        assert_eq!(" direct ".parse::<ExecutionEnvironment>(), Ok(ExecutionEnvironment::Direct));
        assert!("debian".parse::<ExecutionEnvironment>().is_err());
        assert_eq!(ExecutionEnvironment::Isolated.to_string(), "isolated");
    }

    #[test]
    fn test_direct_strategy() {
        let strategy = DirectStrategy::new("sh", privilege());

        let plain = strategy.build("ls -la", false);
        assert_eq!(plain.program, "sh");
        assert_eq!(plain.args, vec!["-c", "ls -la"]);

        let root = strategy.build("ls /data", true);
        assert_eq!(root.program, "su");
        assert_eq!(root.args, vec!["-c", "ls /data"]);
    }

    #[test]
    fn test_direct_strategy_without_privilege_program() {
        let strategy = DirectStrategy::new("sh", Vec::new());
        assert_eq!(strategy.build("id", true).program, "sh");
    }

    #[test]
    fn test_isolated_strategy_escapes_quotes() {
        let strategy = IsolatedStrategy::new(privilege(), "/data/local/debian", "/bin/bash");
        let command = strategy.build("echo 'hi'", false);

        assert_eq!(command.program, "su");
        assert_eq!(
            command.args,
            vec![
                "-c",
                "chroot /data/local/debian /bin/bash --login -c 'echo '\\''hi'\\'''"
            ]
        );
    }

    #[test]
    fn test_settings_carry_timeout() {
        let settings = ExecutorSettings::default();
        let command = IsolatedStrategy::from_settings(&settings).build("true", true);
        assert_eq!(command.timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_is_directory_change() {
        assert!(is_directory_change("cd /tmp"));
        assert!(is_directory_change("  cd"));
        assert!(is_directory_change("cd 'my dir'"));
        assert!(!is_directory_change("cdrecord -v"));
        assert!(!is_directory_change("echo cd"));
        assert!(!is_directory_change(""));
        // unbalanced quote falls back to whitespace splitting
        assert!(is_directory_change("cd \"broken"));
    }

    #[test]
    fn test_wrap_isolated() {
        assert_eq!(
            wrap_isolated("/", "ls", false),
            "cd / 2>/dev/null || cd /; ls"
        );
        assert_eq!(
            wrap_isolated("/home/my user", "cd ..", true),
            "cd '/home/my user' 2>/dev/null || cd /; cd .. && pwd"
        );
    }

    #[tokio::test]
    async fn test_wrapped_command_survives_removed_directory() {
        use crate::subprocess::{ProcessRunner, TokioProcessRunner};

        let temp = tempfile::TempDir::new().unwrap();
        let gone = temp.path().join("gone");
        std::fs::create_dir(&gone).unwrap();
        let gone = gone.to_string_lossy().into_owned();
        std::fs::remove_dir(&gone).unwrap();

        let shell = |line: String| {
            ProcessCommandBuilder::new("sh")
                .args(["-c".to_string(), line])
                .build()
        };

        let back_to_root = TokioProcessRunner
            .run(shell(wrap_isolated(&gone, "cd /", true)))
            .await
            .unwrap();
        assert!(back_to_root.status.success());
        assert_eq!(captured_directory(&back_to_root.stdout).as_deref(), Some("/"));
        assert!(back_to_root.stderr.is_empty());

        let echo = TokioProcessRunner
            .run(shell(wrap_isolated(&gone, "echo hi", false)))
            .await
            .unwrap();
        assert!(echo.status.success());
        assert_eq!(echo.stdout, "hi\n");
    }

    #[test]
    fn test_captured_directory() {
        assert_eq!(captured_directory("/home\n\n  \n"), Some("/home".to_string()));
        assert_eq!(
            captured_directory("motd line\n/var/log\n"),
            Some("/var/log".to_string())
        );
        assert_eq!(captured_directory("  \n"), None);
    }
}
