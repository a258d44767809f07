use super::environment::{
    captured_directory, is_directory_change, wrap_isolated, DirectStrategy, ExecutionEnvironment,
    ExecutionStrategy, IsolatedStrategy,
};
use super::history::{HistoryLog, TerminalEntry};
use crate::config::ExecutorSettings;
use crate::subprocess::{ProcessError, ProcessOutput, ProcessRunner};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const NOT_BOOTED: &str = "Isolated environment not booted. Cannot run command.";
const ROOT_DIRECTORY: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The process ran and exited (successfully or not)
    Completed,
    /// `clear` was intercepted; nothing was spawned
    Cleared,
    /// An isolated command was refused before boot
    NotBooted,
    /// Spawn, I/O or timeout failure
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub command: String,
    pub environment: ExecutionEnvironment,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Tracked isolated directory after the command; `None` for direct runs
    pub working_directory: Option<String>,
    pub outcome: ExecutionOutcome,
}

impl ExecutionReport {
    fn without_process(
        command: &str,
        environment: ExecutionEnvironment,
        outcome: ExecutionOutcome,
    ) -> Self {
        Self {
            command: command.to_string(),
            environment,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            working_directory: None,
            outcome,
        }
    }

    pub fn success(&self) -> bool {
        self.outcome == ExecutionOutcome::Completed && self.exit_code == Some(0)
    }
}

struct SessionState {
    runner: Arc<dyn ProcessRunner>,
    settings: ExecutorSettings,
    history: HistoryLog,
    environment: Mutex<ExecutionEnvironment>,
    /// Held for the whole of every isolated invocation
    working_directory: tokio::sync::Mutex<String>,
    boot_initiated: AtomicBool,
}

/// Runs shell commands on the host or inside the chroot and records every
/// invocation in the terminal history.
///
/// Cloning is cheap; clones share one session.
#[derive(Clone)]
pub struct SessionExecutor {
    state: Arc<SessionState>,
}

impl SessionExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, settings: ExecutorSettings) -> Self {
        let environment = settings.default_environment;
        Self {
            state: Arc::new(SessionState {
                runner,
                settings,
                history: HistoryLog::new(),
                environment: Mutex::new(environment),
                working_directory: tokio::sync::Mutex::new(ROOT_DIRECTORY.to_string()),
                boot_initiated: AtomicBool::new(false),
            }),
        }
    }

    pub fn history(&self) -> &HistoryLog {
        &self.state.history
    }

    pub fn environment(&self) -> ExecutionEnvironment {
        *self
            .state
            .environment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the environment for subsequent calls. Commands already in
    /// flight keep the environment they were started with.
    pub fn set_environment(&self, environment: ExecutionEnvironment) {
        let mut current = self
            .state
            .environment
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *current == environment {
            return;
        }
        *current = environment;
        info!("Switched to {} environment", environment);
        self.state.history.append(TerminalEntry::marker(format!(
            "--- Switched to {environment} environment ---"
        )));
    }

    pub fn boot_initiated(&self) -> bool {
        self.state.boot_initiated.load(Ordering::SeqCst)
    }

    /// The tracked isolated working directory.
    ///
    /// Waits for any isolated command in flight.
    pub async fn working_directory(&self) -> String {
        self.state.working_directory.lock().await.clone()
    }

    /// Start the command in the current environment and return immediately.
    ///
    /// Isolated commands run one at a time; direct commands are not ordered
    /// relative to each other.
    pub fn execute(&self, command: &str, privileged: bool) -> JoinHandle<ExecutionReport> {
        self.execute_in(self.environment(), command, privileged)
    }

    /// Like [`execute`](Self::execute) with an explicit environment.
    pub fn execute_in(
        &self,
        environment: ExecutionEnvironment,
        command: &str,
        privileged: bool,
    ) -> JoinHandle<ExecutionReport> {
        let command = command.to_string();

        if command.trim() == "clear" {
            self.state.history.clear();
            let report =
                ExecutionReport::without_process(&command, environment, ExecutionOutcome::Cleared);
            return tokio::spawn(async move { report });
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            match environment {
                ExecutionEnvironment::Direct => state.run_direct(&command, privileged).await,
                ExecutionEnvironment::Isolated => state.run_isolated(&command).await,
            }
        })
    }

    /// Execute and wait for the report.
    pub async fn run(&self, command: &str, privileged: bool) -> ExecutionReport {
        let environment = self.environment();
        match self.execute_in(environment, command, privileged).await {
            Ok(report) => report,
            Err(e) => {
                error!("Command task for '{}' failed: {}", command, e);
                ExecutionReport::without_process(
                    command,
                    environment,
                    ExecutionOutcome::Failed(e.to_string()),
                )
            }
        }
    }

    /// Launch the chroot bootstrap script once.
    ///
    /// The latch is set as soon as the script is launched; its completion is
    /// never checked. The script runs under the boot timeout rather than the
    /// command timeout. The returned handle may be dropped. Returns `None` if
    /// boot was already initiated.
    pub fn boot_isolated_environment(&self) -> Option<JoinHandle<ExecutionReport>> {
        if self.state.boot_initiated.swap(true, Ordering::SeqCst) {
            warn!("Isolated environment boot already initiated");
            return None;
        }

        let settings = &self.state.settings;
        let script = format!(
            "cd {} && ./{}",
            shell_words::quote(&settings.chroot_dir.to_string_lossy()),
            settings.boot_script
        );
        debug!("Initiating isolated environment boot: {}", script);
        self.state
            .history
            .append(TerminalEntry::marker("--- Isolated environment boot initiated ---"));

        let strategy =
            DirectStrategy::from_settings(settings).with_timeout(settings.boot_timeout());
        let state = Arc::clone(&self.state);
        Some(tokio::spawn(async move {
            state.run_direct_with(&strategy, &script, true).await
        }))
    }
}

impl SessionState {
    async fn run_direct(&self, command: &str, privileged: bool) -> ExecutionReport {
        let strategy = DirectStrategy::from_settings(&self.settings);
        self.run_direct_with(&strategy, command, privileged).await
    }

    async fn run_direct_with(
        &self,
        strategy: &DirectStrategy,
        command: &str,
        privileged: bool,
    ) -> ExecutionReport {
        let logged = format!("> {command}");
        self.history.append(TerminalEntry::marker(&logged));
        debug!("Executing in direct: {}", command);

        let process = strategy.build(command, privileged);
        let result = self.runner.run(process).await;
        self.record(command, &logged, strategy.environment(), result, None)
    }

    async fn run_isolated(&self, command: &str) -> ExecutionReport {
        let logged = format!("> {command}");
        let environment = ExecutionEnvironment::Isolated;

        if !self.boot_initiated.load(Ordering::SeqCst) {
            self.history.append(TerminalEntry::marker(&logged));
            error!("{}", NOT_BOOTED);
            self.history.append(TerminalEntry::new(&logged, NOT_BOOTED, true));
            self.history.append(TerminalEntry::separator());
            return ExecutionReport::without_process(
                command,
                environment,
                ExecutionOutcome::NotBooted,
            );
        }

        let mut working_directory = self.working_directory.lock().await;
        self.history.append(TerminalEntry::marker(&logged));
        debug!("Executing in isolated ({}): {}", *working_directory, command);

        let changes_directory = is_directory_change(command);
        let line = wrap_isolated(&working_directory, command, changes_directory);
        let strategy = IsolatedStrategy::from_settings(&self.settings);
        let result = self.runner.run(strategy.build(&line, true)).await;

        let tracked = changes_directory.then_some(&mut *working_directory);
        let mut report = self.record(command, &logged, environment, result, tracked);
        report.working_directory = Some(working_directory.clone());
        report
    }

    /// Write the history entries for one finished invocation.
    ///
    /// `tracked` is the isolated working directory when the command changes
    /// directory; it only moves on exit 0 with a captured path.
    fn record(
        &self,
        command: &str,
        logged: &str,
        environment: ExecutionEnvironment,
        result: Result<ProcessOutput, ProcessError>,
        tracked: Option<&mut String>,
    ) -> ExecutionReport {
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                error!("Exception running command '{}': {}", command, e);
                self.history
                    .append(TerminalEntry::new(logged, format!("Exception: {e}"), true));
                self.history.append(TerminalEntry::separator());
                return ExecutionReport::without_process(
                    command,
                    environment,
                    ExecutionOutcome::Failed(e.to_string()),
                );
            }
        };
        debug!("Command finished with exit status: {:?}", output.status);

        let stdout = output.stdout.trim().to_string();
        let mut errors = output.stderr.trim().to_string();

        if let Some(directory) = tracked {
            match captured_directory(&output.stdout).filter(|_| output.status.success()) {
                Some(new_directory) => {
                    debug!("Working directory: {} -> {}", directory, new_directory);
                    *directory = new_directory;
                }
                None => {
                    warn!("Directory change failed, staying in {}", directory);
                    let note = format!("Directory change failed; still in {directory}");
                    errors = if errors.is_empty() {
                        note
                    } else {
                        format!("{errors}\n{note}")
                    };
                }
            }
        }

        if !stdout.is_empty() {
            self.history.append(TerminalEntry::new("Output:", &stdout, false));
        }
        if !errors.is_empty() {
            self.history.append(TerminalEntry::new("Error:", &errors, true));
        }
        if stdout.is_empty() && errors.is_empty() {
            self.history.append(TerminalEntry::marker("(No output)"));
        }
        self.history.append(TerminalEntry::separator());

        ExecutionReport {
            command: command.to_string(),
            environment,
            exit_code: output.status.code(),
            stdout,
            stderr: errors,
            working_directory: None,
            outcome: ExecutionOutcome::Completed,
        }
    }
}
