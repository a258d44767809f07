//! Subprocess abstraction used by the session executor and the privileged
//! file accessor.
//!
//! Production code runs commands through [`TokioProcessRunner`]; tests swap in
//! [`MockProcessRunner`] behind the same [`ProcessRunner`] trait.

pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;

#[cfg(test)]
mod tests;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::{MockProcessRunner, MockReply};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
