//! Language-model stages.
//!
//! A [`Stage`] is one text-in/text-out transformer with its own conversation
//! history. The five pipeline roles share the type and differ only in their
//! [`StageConfig`].

pub mod backend;
pub mod conversation;
pub mod mock;
pub mod stage;

pub use backend::CommandModelService;
pub use mock::ScriptedModelService;
pub use stage::{Stage, StageConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_MODEL_ID: &str = "gemini-2.0-flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageRole {
    Stepper,
    Tagger,
    Generator,
    Consolidator,
    Verifier,
}

impl StageRole {
    pub const ALL: [StageRole; 5] = [
        StageRole::Stepper,
        StageRole::Tagger,
        StageRole::Generator,
        StageRole::Consolidator,
        StageRole::Verifier,
    ];

    /// Section header used in the stage model config file
    pub fn section_name(&self) -> &'static str {
        match self {
            StageRole::Stepper => "QueryStepper",
            StageRole::Tagger => "Tagger",
            StageRole::Generator => "CommandGenerator",
            StageRole::Consolidator => "CommandConsolidator",
            StageRole::Verifier => "CommandVerifier",
        }
    }

    pub fn from_section_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.section_name() == name.trim())
    }

    pub fn default_model_id(&self) -> &'static str {
        DEFAULT_MODEL_ID
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section_name())
    }
}

/// Everything the backend needs for one generation
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub stage: StageRole,
    pub model_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    /// Prior turns, oldest first
    pub history: Vec<Message>,
    pub input: String,
}

/// The language-model collaborator.
///
/// Transport and format failures are reported as text (empty or an
/// `Error: ...` line), never as `Err`; the pipeline treats them like any
/// other malformed stage output.
#[async_trait]
pub trait ModelService: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> String;
}
