use super::{ModelRequest, ModelService, StageRole};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Model service that replays queued replies per stage and records every
/// request it receives.
///
/// A stage with nothing queued gets an empty reply, the same thing a failed
/// network call produces.
#[derive(Clone, Default)]
pub struct ScriptedModelService {
    replies: Arc<Mutex<HashMap<StageRole, VecDeque<String>>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
    delay: Option<Duration>,
}

impl ScriptedModelService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply, for exercising stage deadlines
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn reply(&self, stage: StageRole, text: &str) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(text.to_string());
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, stage: StageRole) -> Vec<ModelRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.stage == stage)
            .collect()
    }

    pub fn last_input(&self, stage: StageRole) -> Option<String> {
        self.requests_for(stage).last().map(|r| r.input.clone())
    }
}

#[async_trait]
impl ModelService for ScriptedModelService {
    async fn generate(&self, request: ModelRequest) -> String {
        let stage = request.stage;
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.replies
            .lock()
            .unwrap()
            .get_mut(&stage)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default()
    }
}
