use serde::Serialize;
use thiserror::Error;

use crate::types::{ServerName, ToolName};

/// Failure classes surfaced to callers of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidRequest,
    ConfigurationMissing,
    AgentExecutionFailed,
    StepLimitExceeded,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "InvalidRequest",
            Self::ConfigurationMissing => "ConfigurationMissing",
            Self::AgentExecutionFailed => "AgentExecutionFailed",
            Self::StepLimitExceeded => "StepLimitExceeded",
        }
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key for {0}")]
    MissingApiKey(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Error, Debug)]
pub enum ToolServerError {
    #[error("Failed to launch tool server '{server}': {reason}")]
    SpawnFailed { server: ServerName, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request '{0}' timed out")]
    Timeout(String),

    #[error("Tool '{tool}' is exposed by both '{first}' and '{second}'")]
    DuplicateTool {
        tool: ToolName,
        first: ServerName,
        second: ServerName,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    /// Every absent secret, in the order it was required.
    #[error("Server configuration error: {} is not set", .0.join(", "))]
    MissingSecrets(Vec<String>),

    #[error("Invalid agent configuration: {0}")]
    InvalidAgentConfig(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn missing_names(&self) -> &[String] {
        match self {
            Self::MissingSecrets(names) => names,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_secrets_message_lists_every_name() {
        let err = ConfigError::MissingSecrets(vec![
            "ANTHROPIC_API_KEY".to_string(),
            "SUPABASE_ACCESS_TOKEN".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("ANTHROPIC_API_KEY"));
        assert!(msg.contains("SUPABASE_ACCESS_TOKEN"));
        assert_eq!(err.missing_names().len(), 2);
    }

    #[test]
    fn duplicate_tool_names_both_servers() {
        let err = ToolServerError::DuplicateTool {
            tool: ToolName::new("search"),
            first: ServerName::new("data-store"),
            second: ServerName::new("issue-tracker"),
        };
        let msg = err.to_string();
        assert!(msg.contains("data-store"));
        assert!(msg.contains("issue-tracker"));
    }
}
