use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub mod anthropic;
mod scripted;

pub use scripted::ScriptedFactory;

use crate::api::{ContentBlock, Message, ToolDefinition};
use crate::config::{ANTHROPIC_API_KEY, Settings};
use crate::errors::ProviderError;
use crate::types::{ModelId, ToolId, ToolName};
use reqwest::Client;

pub(crate) struct ProviderHttpClient {
    client: Client,
}

impl ProviderHttpClient {
    pub fn new(timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Request structure for LLM inference
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    pub model: ModelId,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub system: String,
}

/// Response structure from LLM inference
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: String,
    pub usage: Usage,
}

impl InferenceResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            stop_reason: "end_turn".to_string(),
            usage: Usage::default(),
        }
    }

    /// A response asking for a single tool invocation.
    pub fn tool_use(id: &str, name: &str, input: Value) -> Self {
        Self {
            content: vec![ContentBlock::ToolUse {
                id: ToolId::new(id),
                name: ToolName::new(name),
                input,
            }],
            stop_reason: "tool_use".to_string(),
            usage: Usage::default(),
        }
    }

    pub fn blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            stop_reason: "end_turn".to_string(),
            usage: Usage::default(),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Trait for LLM providers
#[async_trait::async_trait]
pub trait LLMProvider: Send + Sync {
    /// Run inference with the given request
    async fn infer(&self, req: &InferenceRequest) -> Result<InferenceResponse, ProviderError>;

    /// Get the name of this provider
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &ModelId;

    /// Validate that this provider is properly configured
    fn validate_config(&self) -> Result<(), ProviderError>;
}

/// Builds a provider bound to one model for the length of a single run.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, model: &ModelId) -> Result<Box<dyn LLMProvider>, ProviderError>;
}

pub struct AnthropicFactory {
    key: Option<String>,
    timeout_secs: u64,
}

impl AnthropicFactory {
    pub fn new(key: Option<String>, timeout_secs: u64) -> Self {
        Self { key, timeout_secs }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.secrets.get(ANTHROPIC_API_KEY).map(String::from),
            settings.app.model.timeout_seconds,
        )
    }
}

impl ProviderFactory for AnthropicFactory {
    fn create(&self, model: &ModelId) -> Result<Box<dyn LLMProvider>, ProviderError> {
        let key = self
            .key
            .clone()
            .ok_or_else(|| ProviderError::MissingApiKey("anthropic".to_string()))?;
        let provider =
            anthropic::AnthropicProvider::new_with_model(key, Some(model.clone()), self.timeout_secs)?;
        provider.validate_config()?;
        Ok(Box::new(provider))
    }
}
