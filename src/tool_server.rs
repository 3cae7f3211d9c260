//! Launch descriptors for the external systems an agent may reach.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{
    ANTHROPIC_API_KEY, GITHUB_PERSONAL_ACCESS_TOKEN, SUPABASE_ACCESS_TOKEN, Settings,
};
use crate::errors::ConfigError;
use crate::types::{ServerName, ToolName};

/// How to launch one isolated tool-execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: ServerName,
    pub command: String,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ToolServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: ServerName::new(name),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Command line with secret-bearing values masked, for logs.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.command.clone()];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                parts.push("***".to_string());
                mask_next = false;
            } else {
                mask_next = arg == "--access-token";
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// External systems the pipeline knows how to launch a tool server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalSystem {
    DataStore,
    IssueTracker,
}

impl ExternalSystem {
    pub fn server_name(self) -> &'static str {
        match self {
            Self::DataStore => "data-store",
            Self::IssueTracker => "issue-tracker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "data-store" | "supabase" => Some(Self::DataStore),
            "issue-tracker" | "github" => Some(Self::IssueTracker),
            _ => None,
        }
    }

    /// Secrets an agent bound to this system needs, model key included.
    pub fn required_secrets(self) -> &'static [&'static str] {
        match self {
            Self::DataStore => &[ANTHROPIC_API_KEY, SUPABASE_ACCESS_TOKEN],
            Self::IssueTracker => &[GITHUB_PERSONAL_ACCESS_TOKEN, ANTHROPIC_API_KEY],
        }
    }

    /// Tools an agent bound to this system must never be offered.
    pub fn denied_tools(self, settings: &Settings) -> Vec<ToolName> {
        match self {
            Self::DataStore => settings
                .app
                .data_store
                .denied_tools
                .iter()
                .map(ToolName::new)
                .collect(),
            Self::IssueTracker => Vec::new(),
        }
    }
}

/// Build the launch descriptor for `system`, failing with every missing secret.
pub fn compose(system: ExternalSystem, settings: &Settings) -> Result<ToolServerConfig, ConfigError> {
    let secrets = settings.secrets.require_all(system.required_secrets())?;

    let config = match system {
        ExternalSystem::DataStore => {
            let store = &settings.app.data_store;
            let token = secrets[1];
            let mut cfg = ToolServerConfig::new(system.server_name(), &store.command)
                .arg("-y")
                .arg(&store.package)
                .arg("--access-token")
                .arg(token);
            if !store.project_ref.is_empty() {
                cfg = cfg.arg("--project-ref").arg(&store.project_ref);
            }
            if store.read_only {
                cfg = cfg.arg("--read-only");
            }
            cfg
        }
        ExternalSystem::IssueTracker => {
            let tracker = &settings.app.issue_tracker;
            let token = secrets[0];
            ToolServerConfig::new(system.server_name(), &tracker.command)
                .arg("run")
                .arg("-i")
                .arg("--rm")
                .arg("-e")
                .arg(GITHUB_PERSONAL_ACCESS_TOKEN)
                .arg("-e")
                .arg("GITHUB_TOOLSETS")
                .arg(&tracker.image)
                .env(GITHUB_PERSONAL_ACCESS_TOKEN, token)
                .env("GITHUB_TOOLSETS", &tracker.toolsets)
        }
    };

    Ok(config)
}

/// Check several systems at once, accumulating every missing secret name.
pub fn preflight(systems: &[ExternalSystem], settings: &Settings) -> Result<(), ConfigError> {
    let mut missing: Vec<String> = Vec::new();
    for system in systems {
        if let Err(err) = settings.secrets.require_all(system.required_secrets()) {
            for name in err.missing_names() {
                if !missing.contains(name) {
                    missing.push(name.clone());
                }
            }
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingSecrets(missing))
    }
}
