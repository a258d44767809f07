use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::error::ProcessError;

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub stdin: Option<String>,
}

impl ProcessCommand {
    /// Program and arguments joined by spaces, for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        *self == ExitStatus::Success
    }

    /// Exit code; `None` when the process was killed by a signal
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if status.success() {
            return ExitStatus::Success;
        }
        if let Some(code) = status.code() {
            return ExitStatus::Error(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }
        ExitStatus::Error(1)
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a command to completion, capturing stdout and stderr.
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

/// Runner backed by `tokio::process`.
///
/// stdout and stderr are each drained by their own task, started before any
/// stdin is written. A child blocked on a full pipe nobody reads would never
/// exit. The exit status is only collected after both streams hit EOF.
pub struct TokioProcessRunner;

type Drain = JoinHandle<io::Result<Vec<u8>>>;

fn prepare(command: &ProcessCommand) -> Command {
    let mut process = Command::new(&command.program);
    process
        .args(&command.args)
        .envs(&command.env)
        .stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &command.working_dir {
        process.current_dir(dir);
    }
    process
}

fn spawn_error(command: &ProcessCommand, source: io::Error) -> ProcessError {
    error!("Cannot spawn {}: {}", command.program, source);
    match source.kind() {
        io::ErrorKind::NotFound => ProcessError::CommandNotFound(command.program.clone()),
        _ => ProcessError::SpawnFailed {
            command: command.display(),
            source,
        },
    }
}

fn drain<R>(stream: Option<R>, name: &str) -> Result<Drain, ProcessError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut stream = stream.ok_or_else(|| ProcessError::InternalError {
        message: format!("Failed to capture {name}"),
    })?;
    Ok(tokio::spawn(async move {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).await?;
        Ok(bytes)
    }))
}

/// Decoded text of a finished drain; a read error is logged and yields
/// whatever is reported in `problems`.
fn collected(
    result: Result<io::Result<Vec<u8>>, tokio::task::JoinError>,
    name: &str,
    problems: &mut Vec<String>,
) -> Result<String, ProcessError> {
    match result {
        Ok(Ok(bytes)) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Ok(Err(e)) => {
            error!("Error reading {}: {}", name, e);
            problems.push(format!("Error reading {name}: {e}"));
            Ok(String::new())
        }
        Err(e) => Err(ProcessError::InternalError {
            message: format!("{name} reader task failed: {e}"),
        }),
    }
}

async fn feed(child: &mut Child, input: &str) -> Result<(), ProcessError> {
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).await?;
        stdin.shutdown().await?;
    }
    Ok(())
}

async fn wait_for_exit(
    child: &mut Child,
    stdout: Drain,
    stderr: Drain,
) -> Result<(ExitStatus, String, String), ProcessError> {
    let (stdout, stderr) = tokio::join!(stdout, stderr);

    let mut problems = Vec::new();
    let stdout = collected(stdout, "stdout", &mut problems)?;
    let mut stderr = collected(stderr, "stderr", &mut problems)?;
    for problem in problems {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&problem);
    }

    let status = child.wait().await?;
    Ok((status.into(), stdout, stderr))
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        debug!("Executing subprocess: {}", command.display());
        if !command.env.is_empty() {
            trace!("Environment overrides: {:?}", command.env.keys());
        }

        let started = Instant::now();
        let mut child = prepare(&command)
            .spawn()
            .map_err(|e| spawn_error(&command, e))?;

        let stdout = drain(child.stdout.take(), "stdout")?;
        let stderr = drain(child.stderr.take(), "stderr")?;
        if let Some(input) = &command.stdin {
            trace!("Writing {} bytes to stdin", input.len());
            feed(&mut child, input).await?;
        }

        let finished = match command.timeout {
            None => wait_for_exit(&mut child, stdout, stderr).await,
            Some(limit) => {
                match tokio::time::timeout(limit, wait_for_exit(&mut child, stdout, stderr)).await
                {
                    Ok(finished) => finished,
                    Err(_) => {
                        warn!("Timed out after {:?}: {}", limit, command.display());
                        if let Err(e) = child.kill().await {
                            warn!("Failed to kill timed out process: {}", e);
                        }
                        return Err(ProcessError::Timeout(limit));
                    }
                }
            }
        };
        let (status, stdout, stderr) = finished?;

        let output = ProcessOutput {
            status,
            stdout,
            stderr,
            duration: started.elapsed(),
        };
        match &output.status {
            ExitStatus::Signal(signal) => {
                warn!("{} terminated by signal {}", command.program, signal)
            }
            status => debug!(
                "{} finished with {:?} in {:?}",
                command.program, status, output.duration
            ),
        }
        Ok(output)
    }
}
