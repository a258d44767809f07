//! The five-stage request pipeline.
//!
//! A query goes Stepper → Tagger → Generator → Consolidator → Verifier. The
//! Tagger's tags are replaced with knowledge-base documentation before the
//! Generator sees them, the Generator may stop to ask the user a question,
//! and a failed verification sends the reason back to the Generator.

pub mod commands;
pub mod document;
pub mod json;
pub mod orchestrator;
pub mod retry;

pub use commands::{extract_commands, CommandSink};
pub use orchestrator::{
    answer_message, retry_message, PipelineEvent, PipelineOrchestrator, PipelineOutcome,
    PipelineState,
};
pub use retry::RetryPolicy;
