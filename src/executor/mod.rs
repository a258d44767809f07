//! Dual-environment command execution.
//!
//! Commands run either on the host shell ([`ExecutionEnvironment::Direct`])
//! or inside a chroot reached through the privilege program
//! ([`ExecutionEnvironment::Isolated`]). Each isolated invocation is a fresh
//! shell, so the executor keeps the working directory itself and replays it
//! in front of every command.

pub mod environment;
pub mod history;
pub mod session;

pub use environment::{DirectStrategy, ExecutionEnvironment, ExecutionStrategy, IsolatedStrategy};
pub use history::{HistoryLog, HistorySnapshot, TerminalEntry};
pub use session::{ExecutionOutcome, ExecutionReport, SessionExecutor};
