use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{InferenceRequest, InferenceResponse, LLMProvider, ProviderFactory};
use crate::errors::ProviderError;
use crate::types::ModelId;

#[derive(Default)]
struct Script {
    queued: VecDeque<Result<InferenceResponse, String>>,
    fallback: Option<InferenceResponse>,
    requests: Vec<InferenceRequest>,
    created: usize,
}

/// Test double that replays canned responses and records every request.
///
/// Every provider it creates shares one script, so a test can queue the
/// whole conversation up front and inspect it afterwards.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    script: Arc<Mutex<Script>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: InferenceResponse) -> &Self {
        self.script.lock().unwrap().queued.push_back(Ok(response));
        self
    }

    pub fn push_error(&self, message: impl Into<String>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .queued
            .push_back(Err(message.into()));
        self
    }

    /// Answer with `response` whenever the queue is empty.
    pub fn repeat(&self, response: InferenceResponse) -> &Self {
        self.script.lock().unwrap().fallback = Some(response);
        self
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.script.lock().unwrap().requests.clone()
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().requests.len()
    }

    pub fn providers_created(&self) -> usize {
        self.script.lock().unwrap().created
    }
}

impl ProviderFactory for ScriptedFactory {
    fn create(&self, model: &ModelId) -> Result<Box<dyn LLMProvider>, ProviderError> {
        self.script.lock().unwrap().created += 1;
        Ok(Box::new(ScriptedProvider {
            model: model.clone(),
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedProvider {
    model: ModelId,
    script: Arc<Mutex<Script>>,
}

#[async_trait::async_trait]
impl LLMProvider for ScriptedProvider {
    async fn infer(&self, req: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(req.clone());
        match script.queued.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(ProviderError::ApiError(message)),
            None => script
                .fallback
                .clone()
                .ok_or_else(|| ProviderError::InvalidResponse("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &ModelId {
        &self.model
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
