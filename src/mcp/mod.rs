//! Tool-execution environments reached over the Model Context Protocol.
//!
//! A [`ToolRuntime`] launches one [`ToolSession`] per [`ToolServerConfig`];
//! the session owns the underlying process or connection until
//! [`ToolSession::shutdown`] is called.

mod mock;
pub mod protocol;
mod stdio;

use serde_json::Value;

use crate::api::ToolDefinition;
use crate::errors::ToolServerError;
use crate::tool_server::ToolServerConfig;
use crate::types::{ServerName, ToolName};

pub use mock::{MockTool, MockToolRuntime, RecordedCall};
pub use stdio::StdioRuntime;

/// Output of one tool invocation as the model should see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[async_trait::async_trait]
pub trait ToolRuntime: Send + Sync {
    async fn launch(&self, config: &ToolServerConfig)
    -> Result<Box<dyn ToolSession>, ToolServerError>;
}

#[async_trait::async_trait]
pub trait ToolSession: Send {
    fn server(&self) -> &ServerName;

    /// Tools the server exposes right now.
    async fn list_tools(&mut self) -> Result<Vec<ToolDefinition>, ToolServerError>;

    /// Invoke a tool. A tool-level error is an `Ok` with `is_error` set;
    /// `Err` means the environment itself failed.
    async fn call_tool(
        &mut self,
        name: &ToolName,
        arguments: &Value,
    ) -> Result<ToolOutput, ToolServerError>;

    /// Release the environment. Called exactly once per launched session.
    async fn shutdown(self: Box<Self>) -> Result<(), ToolServerError>;
}
