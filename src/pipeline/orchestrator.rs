use super::document::{resolve_documentation, strip_documentation};
use super::json::{extract_json, find_ask_user, strip_fences};
use super::retry::RetryPolicy;
use crate::access::FileAccessor;
use crate::config::StageSettingsMap;
use crate::docs::DocumentationResolver;
use crate::model::{ModelService, Stage, StageConfig, StageRole};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const UNKNOWN_FAILURE: &str = "Unknown verification failure";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Stepping,
    Tagging,
    Generating,
    Consolidating,
    Verifying,
    Done,
    /// Waiting for [`PipelineOrchestrator::submit_user_response`]
    AskingUser,
    Halted,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StageCompleted { stage: StageRole, response: String },
    AskUser(String),
    VerificationFailed { reason: String, attempt: u32 },
    Verified(String),
    Halted { stage: StageRole, reason: String },
    RetriesExhausted { attempts: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Verified payload, fences removed
    Done(String),
    AskingUser(String),
    Halted { stage: StageRole, reason: String },
    RetriesExhausted { attempts: u32, reason: String },
}

enum GeneratorReply {
    AskUser(String),
    Forward(String),
}

enum Verdict {
    Success(String),
    Failure(String),
}

/// Message that resumes the generator after it asked the user a question
pub fn answer_message(answer: &str) -> String {
    format!(
        "The user has provided the following input in response to your previous request:\n\
         \"{answer}\"\n\
         \n\
         Please continue by generating the correct JSON output."
    )
}

/// Corrective message sent to the generator after a failed verification
pub fn retry_message(reason: &str) -> String {
    format!(
        "The command you generated has failed verification due to the following reason:\n\
         \"{reason}\"\n\
         \n\
         Please fix the issue and regenerate the correct JSON output for the terminal command steps.\n\
         \n\
         If you require additional input from the user to resolve the issue, include a line starting with:\n\
         ask_user: your question here"
    )
}

/// Chains Stepper, Tagger, Generator, Consolidator and Verifier.
///
/// Every entry point takes `&mut self` and awaits each stage before starting
/// the next, so no stage ever has two requests in flight.
pub struct PipelineOrchestrator {
    stages: BTreeMap<StageRole, Stage>,
    resolver: DocumentationResolver,
    policy: RetryPolicy,
    state: PipelineState,
    retries: u32,
    failure_reason: Option<String>,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl PipelineOrchestrator {
    pub fn new(
        service: Arc<dyn ModelService>,
        resolver: DocumentationResolver,
        policy: RetryPolicy,
    ) -> Self {
        let stages = StageRole::ALL
            .into_iter()
            .map(|role| (role, Stage::new(role, Arc::clone(&service))))
            .collect();

        Self {
            stages,
            resolver,
            policy,
            state: PipelineState::Idle,
            retries: 0,
            failure_reason: None,
            events: None,
        }
    }

    /// Give every stage a reply deadline
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stages = std::mem::take(&mut self.stages)
            .into_iter()
            .map(|(role, stage)| (role, stage.with_timeout(timeout)))
            .collect();
        self
    }

    /// Apply per-stage settings and load their context files. Stages without
    /// a section keep the role defaults.
    pub async fn configure(&mut self, settings: &StageSettingsMap, accessor: &dyn FileAccessor) {
        for (role, stage) in self.stages.iter_mut() {
            let config = match settings.get(*role) {
                Some(stage_settings) => StageConfig::from_settings(*role, stage_settings),
                None => {
                    debug!("No settings for {}, using defaults", role);
                    StageConfig::for_role(*role)
                }
            };
            stage.initialize(config, accessor).await;
        }
    }

    /// Receive pipeline events. A new subscription replaces the previous one.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Reason given by the most recent failed verification
    pub fn verification_failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn stage(&self, role: StageRole) -> Option<&Stage> {
        self.stages.get(&role)
    }

    pub fn stage_mut(&mut self, role: StageRole) -> Option<&mut Stage> {
        self.stages.get_mut(&role)
    }

    /// Run a new query from the Stepper onwards.
    pub async fn submit(&mut self, query: &str) -> PipelineOutcome {
        info!("Submitting query to pipeline");
        self.retries = 0;
        self.failure_reason = None;

        self.state = PipelineState::Stepping;
        let steps = self.send(StageRole::Stepper, query).await;
        let steps = match Self::on_stepper_result(&steps) {
            Ok(steps) => steps,
            Err(reason) => return self.halt(StageRole::Stepper, reason),
        };

        self.state = PipelineState::Tagging;
        let tagged = self.send(StageRole::Tagger, &steps).await;
        let enriched = match self.on_tagger_result(&tagged).await {
            Ok(enriched) => enriched,
            Err(reason) => return self.halt(StageRole::Tagger, reason),
        };

        self.generate(enriched).await
    }

    /// Answer the generator's pending `ask_user:` question and resume from
    /// the Generator. Ignored unless a question is pending.
    pub async fn submit_user_response(&mut self, answer: &str) -> PipelineOutcome {
        if self.state != PipelineState::AskingUser {
            warn!("User response ignored: no pending question");
            return PipelineOutcome::Halted {
                stage: StageRole::Generator,
                reason: "no pending question".to_string(),
            };
        }
        self.generate(answer_message(answer)).await
    }

    /// Generator, Consolidator and Verifier, repeated while verification
    /// fails and the retry policy allows another attempt.
    async fn generate(&mut self, mut input: String) -> PipelineOutcome {
        loop {
            self.state = PipelineState::Generating;
            let generated = self.send(StageRole::Generator, &input).await;
            let payload = match Self::on_generator_result(&generated) {
                Ok(GeneratorReply::Forward(payload)) => payload,
                Ok(GeneratorReply::AskUser(question)) => {
                    info!("Generator requested user input: {}", question);
                    self.state = PipelineState::AskingUser;
                    self.emit(PipelineEvent::AskUser(question.clone()));
                    return PipelineOutcome::AskingUser(question);
                }
                Err(reason) => return self.halt(StageRole::Generator, reason),
            };

            self.state = PipelineState::Consolidating;
            let consolidated = self.send(StageRole::Consolidator, &payload).await;

            self.state = PipelineState::Verifying;
            let verdict = self.send(StageRole::Verifier, &consolidated).await;
            let reason = match Self::on_verifier_result(&verdict) {
                Ok(Verdict::Success(payload)) => {
                    info!("Verification succeeded");
                    self.state = PipelineState::Done;
                    self.emit(PipelineEvent::Verified(payload.clone()));
                    return PipelineOutcome::Done(payload);
                }
                Ok(Verdict::Failure(reason)) => reason,
                Err(reason) => return self.halt(StageRole::Verifier, reason),
            };

            error!("Verification failed: {}", reason);
            self.failure_reason = Some(reason.clone());

            let attempt = self.retries + 1;
            if !self.policy.allows(attempt) {
                warn!("Giving up after {} verification retries", self.retries);
                self.state = PipelineState::Exhausted;
                self.emit(PipelineEvent::RetriesExhausted {
                    attempts: self.retries,
                    reason: reason.clone(),
                });
                return PipelineOutcome::RetriesExhausted {
                    attempts: self.retries,
                    reason,
                };
            }
            self.retries = attempt;
            self.emit(PipelineEvent::VerificationFailed {
                reason: reason.clone(),
                attempt,
            });

            let delay = self.policy.delay_for(attempt);
            if !delay.is_zero() {
                debug!("Retrying generation in {:?} (attempt {})", delay, attempt);
                tokio::time::sleep(delay).await;
            }
            input = retry_message(&reason);
        }
    }

    async fn send(&mut self, role: StageRole, input: &str) -> String {
        let response = match self.stages.get_mut(&role) {
            Some(stage) => stage.send(input).await,
            None => String::new(),
        };
        debug!("{} produced response: {}", role, response);
        self.emit(PipelineEvent::StageCompleted {
            stage: role,
            response: response.clone(),
        });
        response
    }

    fn on_stepper_result(text: &str) -> Result<String, String> {
        extract_json(text).ok_or_else(|| "stepper reply is not valid JSON".to_string())
    }

    async fn on_tagger_result(&self, text: &str) -> Result<String, String> {
        let document: Value = serde_json::from_str(&strip_fences(text))
            .map_err(|e| format!("tagger reply is not valid JSON: {e}"))?;
        let enriched = resolve_documentation(&document, &self.resolver)
            .await
            .map_err(|e| e.to_string())?;
        Ok(enriched.to_string())
    }

    fn on_generator_result(text: &str) -> Result<GeneratorReply, String> {
        let cleaned = strip_fences(text);
        if let Some(question) = find_ask_user(&cleaned) {
            return Ok(GeneratorReply::AskUser(question));
        }

        let document: Value = serde_json::from_str(&cleaned)
            .map_err(|e| format!("generator reply is not valid JSON: {e}"))?;
        let stripped = strip_documentation(&document).map_err(|e| e.to_string())?;
        Ok(GeneratorReply::Forward(stripped.to_string()))
    }

    fn on_verifier_result(text: &str) -> Result<Verdict, String> {
        let cleaned = strip_fences(text);
        let document: Value = serde_json::from_str(&cleaned)
            .map_err(|e| format!("verifier reply is not valid JSON: {e}"))?;
        if !document.is_object() {
            return Err("verifier reply is not a JSON object".to_string());
        }

        if document.get("verification_result").and_then(Value::as_str) == Some("success") {
            return Ok(Verdict::Success(cleaned));
        }
        let reason = document
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_FAILURE)
            .to_string();
        Ok(Verdict::Failure(reason))
    }

    fn halt(&mut self, stage: StageRole, reason: String) -> PipelineOutcome {
        error!("Pipeline halted at {}: {}", stage, reason);
        self.state = PipelineState::Halted;
        self.emit(PipelineEvent::Halted {
            stage,
            reason: reason.clone(),
        });
        PipelineOutcome::Halted { stage, reason }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver just means nobody is listening
            let _ = events.send(event);
        }
    }
}
