//! Scripted [`ProcessRunner`] for tests.
//!
//! Replies are registered per program and matched in registration order. A
//! reply limited with [`MockReply::once`] or [`MockReply::times`] stops
//! matching when used up, so later replies for the same program act as a
//! queue of outcomes.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

type ArgsMatcher = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

struct Scripted {
    program: String,
    matcher: Option<ArgsMatcher>,
    outcome: Result<ProcessOutput, ()>,
    remaining: Option<usize>,
}

impl Scripted {
    fn matches(&self, command: &ProcessCommand) -> bool {
        self.program == command.program
            && self.remaining != Some(0)
            && self
                .matcher
                .as_ref()
                .map_or(true, |matcher| matcher(&command.args))
    }
}

#[derive(Default)]
struct Script {
    replies: Vec<Scripted>,
    calls: Vec<ProcessCommand>,
}

#[derive(Clone, Default)]
pub struct MockProcessRunner {
    script: Arc<Mutex<Script>>,
}

/// One reply being configured; nothing is registered until
/// [`install`](Self::install).
pub struct MockReply {
    runner: MockProcessRunner,
    reply: Scripted,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start scripting a reply for `program`: exit 0 with no output unless
    /// configured otherwise.
    pub fn on(&self, program: &str) -> MockReply {
        MockReply {
            runner: self.clone(),
            reply: Scripted {
                program: program.to_string(),
                matcher: None,
                outcome: Ok(ProcessOutput {
                    status: ExitStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::from_millis(1),
                }),
                remaining: None,
            },
        }
    }

    /// Every command received, matched or not, in arrival order
    pub fn calls(&self) -> Vec<ProcessCommand> {
        self.script().calls.clone()
    }

    pub fn call_count(&self, program: &str) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|call| call.program == program)
            .count()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let mut script = self.script();
        script.calls.push(command.clone());

        let Some(reply) = script.replies.iter_mut().find(|reply| reply.matches(&command)) else {
            return Err(ProcessError::MockExpectationNotMet(format!(
                "nothing scripted for {}",
                command.display()
            )));
        };
        if let Some(remaining) = reply.remaining.as_mut() {
            *remaining -= 1;
        }

        match &reply.outcome {
            Ok(output) => Ok(output.clone()),
            Err(()) => Err(ProcessError::CommandNotFound(command.program.clone())),
        }
    }
}

impl MockReply {
    /// Only match commands whose arguments satisfy `matcher`
    pub fn when_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.reply.matcher = Some(Box::new(matcher));
        self
    }

    fn output(&mut self) -> Option<&mut ProcessOutput> {
        self.reply.outcome.as_mut().ok()
    }

    pub fn stdout(mut self, text: &str) -> Self {
        if let Some(output) = self.output() {
            output.stdout = text.to_string();
        }
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        if let Some(output) = self.output() {
            output.stderr = text.to_string();
        }
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        if let Some(output) = self.output() {
            output.status = match code {
                0 => ExitStatus::Success,
                code => ExitStatus::Error(code),
            };
        }
        self
    }

    /// Behave like a program missing from `PATH`
    pub fn not_found(mut self) -> Self {
        self.reply.outcome = Err(());
        self
    }

    pub fn times(mut self, count: usize) -> Self {
        self.reply.remaining = Some(count);
        self
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    pub fn install(self) {
        self.runner.script().replies.push(self.reply);
    }
}
