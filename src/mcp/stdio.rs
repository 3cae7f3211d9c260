use serde_json::{Value, json};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::protocol::{
    InitializeParams, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    ToolCallParams, ToolCallResult,
};
use super::{ToolOutput, ToolRuntime, ToolSession};
use crate::api::ToolDefinition;
use crate::errors::ToolServerError;
use crate::tool_server::ToolServerConfig;
use crate::types::{ServerName, ToolName};

const INHERITED_ENV: &[&str] = &["PATH", "HOME", "USER", "LANG", "TERM"];
const MAX_TOOL_PAGES: usize = 50;

/// Launches tool servers as child processes speaking line-delimited JSON-RPC.
#[derive(Debug, Clone)]
pub struct StdioRuntime {
    request_timeout: Duration,
    shutdown_grace: Duration,
}

impl Default for StdioRuntime {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl StdioRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

#[async_trait::async_trait]
impl ToolRuntime for StdioRuntime {
    async fn launch(
        &self,
        config: &ToolServerConfig,
    ) -> Result<Box<dyn ToolSession>, ToolServerError> {
        let spawn_failed = |reason: String| ToolServerError::SpawnFailed {
            server: config.name.clone(),
            reason,
        };

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Only pass through what the server needs; secrets go in `config.env`.
        cmd.env_clear();
        for key in INHERITED_ENV {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.envs(&config.env);

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_failed(format!("failed to spawn '{}': {e}", config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_failed("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_failed("failed to capture stdout".into()))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(config.name.clone(), stderr);
        }

        log::debug!(
            "launched tool server '{}': {}",
            config.name,
            config.display_command()
        );

        let mut session = StdioSession {
            server: config.name.clone(),
            next_id: 1,
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            request_timeout: self.request_timeout,
            shutdown_grace: self.shutdown_grace,
        };

        if let Err(err) = session.initialize().await {
            session.terminate().await;
            return Err(err);
        }

        Ok(Box::new(session))
    }
}

fn forward_stderr(server: ServerName, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("[{server}] {}", line.trim_end());
        }
    });
}

struct StdioSession {
    server: ServerName,
    next_id: u64,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    request_timeout: Duration,
    shutdown_grace: Duration,
}

impl StdioSession {
    async fn initialize(&mut self) -> Result<(), ToolServerError> {
        let params = serde_json::to_value(InitializeParams::relayrs())?;
        let response = self.send_request("initialize", Some(params)).await?;
        log::debug!(
            "tool server '{}' initialized: {}",
            self.server,
            response
                .get("serverInfo")
                .map(Value::to_string)
                .unwrap_or_default()
        );
        let notif = JsonRpcNotification::new("notifications/initialized");
        self.write_line(&serde_json::to_string(&notif)?).await
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ToolServerError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ToolServerError::Transport("stdin already closed".into()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ToolServerError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = JsonRpcRequest::new(id, method, params);
        self.write_line(&serde_json::to_string(&request)?).await?;

        let response = tokio::time::timeout(self.request_timeout, self.read_response(id))
            .await
            .map_err(|_| ToolServerError::Timeout(method.to_string()))??;

        response.into_result()
    }

    /// Read stdout until the response for `expected_id` arrives.
    async fn read_response(&mut self, expected_id: u64) -> Result<JsonRpcResponse, ToolServerError> {
        let mut buf = String::new();
        loop {
            buf.clear();
            let n = self.stdout.read_line(&mut buf).await?;
            if n == 0 {
                return Err(ToolServerError::Transport(format!(
                    "tool server '{}' closed stdout",
                    self.server
                )));
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.matches(expected_id) => return Ok(resp),
                Ok(_) => log::debug!("[{}] skipping unrelated message", self.server),
                Err(_) => log::debug!("[{}] ignoring non JSON-RPC line", self.server),
            }
        }
    }

    async fn terminate(&mut self) {
        self.stdin.take();
        match tokio::time::timeout(self.shutdown_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                log::debug!("tool server '{}' exited with {status}", self.server);
            }
            Ok(Err(e)) => {
                log::warn!("waiting on tool server '{}' failed: {e}", self.server);
            }
            Err(_) => {
                log::debug!(
                    "tool server '{}' did not exit within {:?}, killing",
                    self.server,
                    self.shutdown_grace
                );
                if let Err(e) = self.child.kill().await {
                    log::warn!("failed to kill tool server '{}': {e}", self.server);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ToolSession for StdioSession {
    fn server(&self) -> &ServerName {
        &self.server
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDefinition>, ToolServerError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.send_request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| ToolServerError::Protocol(format!("failed to parse tools list: {e}")))?;

            tools.extend(page.tools.into_iter().map(|t| ToolDefinition {
                name: ToolName::new(t.name),
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    async fn call_tool(
        &mut self,
        name: &ToolName,
        arguments: &Value,
    ) -> Result<ToolOutput, ToolServerError> {
        let params = ToolCallParams {
            name: name.as_str(),
            arguments,
        };
        let result = self
            .send_request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        let call: ToolCallResult = serde_json::from_value(result)
            .map_err(|e| ToolServerError::Protocol(format!("failed to parse tool result: {e}")))?;

        Ok(ToolOutput {
            content: call.joined_text(),
            is_error: call.is_error,
        })
    }

    async fn shutdown(mut self: Box<Self>) -> Result<(), ToolServerError> {
        self.terminate().await;
        Ok(())
    }
}
