use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;
use crate::types::ModelId;

pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const SUPABASE_ACCESS_TOKEN: &str = "SUPABASE_ACCESS_TOKEN";
pub const GITHUB_PERSONAL_ACCESS_TOKEN: &str = "GITHUB_PERSONAL_ACCESS_TOKEN";

const CONFIG_PATH: &str = ".relayrs/config.json";

/// Secrets read once at process start. Empty values count as absent.
#[derive(Clone, Default)]
pub struct Secrets {
    anthropic_api_key: Option<String>,
    supabase_access_token: Option<String>,
    github_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("anthropic_api_key", &self.anthropic_api_key.is_some())
            .field("supabase_access_token", &self.supabase_access_token.is_some())
            .field("github_token", &self.github_token.is_some())
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            anthropic_api_key: non_empty_var(ANTHROPIC_API_KEY),
            supabase_access_token: non_empty_var(SUPABASE_ACCESS_TOKEN),
            github_token: non_empty_var(GITHUB_PERSONAL_ACCESS_TOKEN),
        }
    }

    pub fn with_anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = non_empty(key.into());
        self
    }

    pub fn with_supabase_access_token(mut self, token: impl Into<String>) -> Self {
        self.supabase_access_token = non_empty(token.into());
        self
    }

    pub fn with_github_token(mut self, token: impl Into<String>) -> Self {
        self.github_token = non_empty(token.into());
        self
    }

    /// Look up a secret by its environment variable name.
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            ANTHROPIC_API_KEY => self.anthropic_api_key.as_deref(),
            SUPABASE_ACCESS_TOKEN => self.supabase_access_token.as_deref(),
            GITHUB_PERSONAL_ACCESS_TOKEN => self.github_token.as_deref(),
            _ => None,
        }
    }

    /// Resolve every name in `names`, or fail listing all that are absent.
    pub fn require_all<'a>(&'a self, names: &[&str]) -> Result<Vec<&'a str>, ConfigError> {
        let mut found = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.get(name) {
                Some(value) => found.push(value),
                None => missing.push((*name).to_string()),
            }
        }
        if missing.is_empty() {
            Ok(found)
        } else {
            Err(ConfigError::MissingSecrets(missing))
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().and_then(non_empty)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub lookup: LookupStageConfig,
    pub issue: IssueStageConfig,
    pub data_store: DataStoreConfig,
    pub issue_tracker: IssueTrackerConfig,
    pub server: ServerConfig,
    pub trace: TraceConfig,
}

impl AppConfig {
    /// Load from `.relayrs/config.json`, then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(Path::new(CONFIG_PATH))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(ConfigError::InvalidAgentConfig(format!(
                "model.temperature must be within [0, 1], got {}",
                self.model.temperature
            )));
        }
        if self.lookup.max_steps == 0 || self.issue.max_steps == 0 {
            return Err(ConfigError::InvalidAgentConfig(
                "max_steps must be positive for every stage".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(model) = non_empty_var("MODEL") {
            self.model.id = ModelId::new(model);
        }
        if let Some(bind) = non_empty_var("RELAYRS_BIND") {
            self.server.bind = bind;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub id: ModelId,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: ModelId::claude_opus(),
            temperature: 0.1,
            max_tokens: 4096,
            timeout_seconds: 120,
        }
    }
}

/// The lookup stage explores an unknown schema and needs room for several calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupStageConfig {
    pub max_steps: u32,
}

impl Default for LookupStageConfig {
    fn default() -> Self {
        Self { max_steps: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueStageConfig {
    pub max_steps: u32,
}

impl Default for IssueStageConfig {
    fn default() -> Self {
        Self { max_steps: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataStoreConfig {
    pub command: String,
    pub package: String,
    pub project_ref: String,
    pub read_only: bool,
    pub denied_tools: Vec<String>,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            command: "npx".to_string(),
            package: "@supabase/mcp-server-supabase@latest".to_string(),
            project_ref: String::new(),
            read_only: true,
            denied_tools: [
                "apply_migration",
                "deploy_edge_function",
                "create_branch",
                "delete_branch",
                "merge_branch",
                "reset_branch",
                "rebase_branch",
                "create_project",
                "pause_project",
                "restore_project",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueTrackerConfig {
    pub command: String,
    pub image: String,
    pub repository: String,
    pub toolsets: String,
}

impl Default for IssueTrackerConfig {
    fn default() -> Self {
        Self {
            command: "docker".to_string(),
            image: "ghcr.io/github/github-mcp-server".to_string(),
            repository: String::new(),
            toolsets: "issues".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from(".relayrs/traces"),
        }
    }
}

/// Process-wide, read-only configuration shared by every request.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub secrets: Secrets,
    pub app: AppConfig,
}

impl Settings {
    pub fn new(secrets: Secrets, app: AppConfig) -> Self {
        Self { secrets, app }
    }

    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self::new(Secrets::from_env(), AppConfig::load()?))
    }
}
