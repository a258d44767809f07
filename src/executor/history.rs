//! Terminal history shared between the executor and its observers.
//!
//! Every mutation pushes the complete entry list to each subscriber, so a
//! late or lagging observer only ever needs the most recent message.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;

pub const SEPARATOR: &str = "___";

#[derive(Debug, Clone)]
pub struct TerminalEntry {
    /// The `> command` line, an `Output:`/`Error:` prefix, or a marker
    pub command: String,
    pub output: String,
    pub is_error: bool,
    pub timestamp: Instant,
    pub recorded_at: DateTime<Utc>,
}

impl TerminalEntry {
    pub fn new(command: impl Into<String>, output: impl Into<String>, is_error: bool) -> Self {
        Self {
            command: command.into(),
            output: output.into(),
            is_error,
            timestamp: Instant::now(),
            recorded_at: Utc::now(),
        }
    }

    pub fn marker(text: impl Into<String>) -> Self {
        Self::new(text, "", false)
    }

    pub fn separator() -> Self {
        Self::marker(SEPARATOR)
    }
}

impl fmt::Display for TerminalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.output.is_empty() {
            write!(f, "{}", self.command)
        } else {
            write!(f, "{}\n{}", self.command, self.output)
        }
    }
}

pub type HistorySnapshot = Vec<TerminalEntry>;

#[derive(Default)]
struct LogState {
    entries: Vec<TerminalEntry>,
    subscribers: Vec<mpsc::UnboundedSender<HistorySnapshot>>,
}

impl LogState {
    fn publish(&mut self) {
        let snapshot = self.entries.clone();
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }
}

/// Append-only entry list guarded by a single lock.
#[derive(Clone, Default)]
pub struct HistoryLog {
    state: Arc<Mutex<LogState>>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, entry: TerminalEntry) {
        let mut state = self.lock();
        state.entries.push(entry);
        state.publish();
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.publish();
        tracing::debug!("Terminal history cleared");
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Receive the full entry list after every mutation, starting with the
    /// current one. Dropped receivers are pruned on the next mutation.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<HistorySnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        // The receiver is alive, so this cannot fail
        let _ = tx.send(state.entries.clone());
        state.subscribers.push(tx);
        rx
    }
}
