use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{ToolOutput, ToolRuntime, ToolSession};
use crate::api::ToolDefinition;
use crate::errors::ToolServerError;
use crate::tool_server::ToolServerConfig;
use crate::types::{ServerName, ToolName};

#[derive(Debug, Clone)]
enum Behavior {
    Reply(String),
    ToolError(String),
    Fault(String),
}

/// A scripted tool exposed by [`MockToolRuntime`].
#[derive(Debug, Clone)]
pub struct MockTool {
    definition: ToolDefinition,
    behavior: Behavior,
}

impl MockTool {
    fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            definition: ToolDefinition {
                name: ToolName::new(name),
                description: format!("mock tool {name}"),
                input_schema: json!({"type": "object"}),
            },
            behavior,
        }
    }

    pub fn replying(name: &str, text: impl Into<String>) -> Self {
        Self::new(name, Behavior::Reply(text.into()))
    }

    /// Returns a tool-level error the model can react to.
    pub fn erroring(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, Behavior::ToolError(message.into()))
    }

    /// Fails the environment itself, as a dead process would.
    pub fn faulting(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, Behavior::Fault(message.into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub server: ServerName,
    pub tool: ToolName,
    pub arguments: Value,
}

/// Test double that records launches, teardowns and tool calls.
///
/// Intended for unit tests of the agent runner and pipeline.
#[derive(Clone, Default)]
pub struct MockToolRuntime {
    tools: Arc<Mutex<HashMap<ServerName, Vec<MockTool>>>>,
    failing: Arc<Mutex<HashSet<ServerName>>>,
    launched: Arc<Mutex<Vec<ToolServerConfig>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    launches: Arc<AtomicUsize>,
    teardowns: Arc<AtomicUsize>,
}

impl MockToolRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(self, server: &str, tools: Vec<MockTool>) -> Self {
        self.tools
            .lock()
            .unwrap()
            .insert(ServerName::new(server), tools);
        self
    }

    pub fn failing_launch(self, server: &str) -> Self {
        self.failing.lock().unwrap().insert(ServerName::new(server));
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn launched_configs(&self) -> Vec<ToolServerConfig> {
        self.launched.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ToolRuntime for MockToolRuntime {
    async fn launch(
        &self,
        config: &ToolServerConfig,
    ) -> Result<Box<dyn ToolSession>, ToolServerError> {
        if self.failing.lock().unwrap().contains(&config.name) {
            return Err(ToolServerError::SpawnFailed {
                server: config.name.clone(),
                reason: "mock launch failure".to_string(),
            });
        }

        self.launches.fetch_add(1, Ordering::SeqCst);
        self.launched.lock().unwrap().push(config.clone());

        let tools = self
            .tools
            .lock()
            .unwrap()
            .get(&config.name)
            .cloned()
            .unwrap_or_default();

        Ok(Box::new(MockSession {
            server: config.name.clone(),
            tools,
            calls: Arc::clone(&self.calls),
            teardowns: Arc::clone(&self.teardowns),
        }))
    }
}

struct MockSession {
    server: ServerName,
    tools: Vec<MockTool>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    teardowns: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl ToolSession for MockSession {
    fn server(&self) -> &ServerName {
        &self.server
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDefinition>, ToolServerError> {
        Ok(self.tools.iter().map(|t| t.definition.clone()).collect())
    }

    async fn call_tool(
        &mut self,
        name: &ToolName,
        arguments: &Value,
    ) -> Result<ToolOutput, ToolServerError> {
        self.calls.lock().unwrap().push(RecordedCall {
            server: self.server.clone(),
            tool: name.clone(),
            arguments: arguments.clone(),
        });

        let tool = self
            .tools
            .iter()
            .find(|t| &t.definition.name == name)
            .ok_or_else(|| ToolServerError::Protocol(format!("unknown tool {name}")))?;

        match &tool.behavior {
            Behavior::Reply(text) => Ok(ToolOutput::ok(text.clone())),
            Behavior::ToolError(msg) => Ok(ToolOutput::error(msg.clone())),
            Behavior::Fault(msg) => Err(ToolServerError::Transport(msg.clone())),
        }
    }

    async fn shutdown(self: Box<Self>) -> Result<(), ToolServerError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
