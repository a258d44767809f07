//! # cmdpilot
//!
//! Turns a natural-language request into a verified shell command sequence
//! and runs it on the host or inside a chroot.
//!
//! ## Usage
//!
//! ```bash
//! cmdpilot ask "compress every log in /sdcard/logs" [--execute] [--yes]
//! cmdpilot exec "ls -la" [--env isolated] [--root]
//! ```
//!
//! ## Modules
//!
//! - `access` - File access, plain or through the privilege program
//! - `config` - TOML settings and the per-stage model config
//! - `docs` - Knowledge-base lookup for documentation tags
//! - `executor` - Direct and isolated command execution with terminal history
//! - `interaction` - Terminal prompts for questions from the pipeline
//! - `model` - Model-backed stages and the backend adapter
//! - `pipeline` - The five-stage orchestration and verification loop
//! - `subprocess` - Process runner abstraction with a mock for tests
pub mod access;
pub mod config;
pub mod docs;
pub mod error;
pub mod executor;
pub mod interaction;
pub mod model;
pub mod pipeline;
pub mod subprocess;

pub use error::{Error, Result};
