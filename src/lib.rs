pub mod agent;
pub mod api;
pub mod config;
pub mod errors;
pub mod extract;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod pipeline;
pub mod providers;
pub mod tool_server;
pub mod trace;
pub mod types;

pub use crate::agent::{AgentConfig, AgentOutput, AgentRunner, StageResult, StageRunner};
pub use crate::config::{AppConfig, Secrets, Settings};
pub use crate::errors::ErrorKind;
pub use crate::extract::{EXTRACTION_PLACEHOLDER, extract};
pub use crate::pipeline::{PipelineOrchestrator, PipelineRequest, PipelineResponse, Stage};
pub use crate::tool_server::{ExternalSystem, ToolServerConfig};
