use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;

/// A validated problem report. Both fields are non-blank.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    pub email: String,
    pub problem_description: String,
}

impl PipelineRequest {
    pub fn new(email: impl Into<String>, problem_description: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            problem_description: problem_description.into(),
        }
    }

    /// First blank field, by its wire name.
    pub fn blank_field(&self) -> Option<&'static str> {
        if self.email.trim().is_empty() {
            Some("email")
        } else if self.problem_description.trim().is_empty() {
            Some("problemDescription")
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Lookup,
    Issue,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Issue => "issue",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Lookup => "Lookup",
            Self::Issue => "Issue",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip)]
    pub error_kind: Option<ErrorKind>,
}

impl PipelineResponse {
    pub fn succeeded(lookup_output: String, issue_output: String) -> Self {
        Self {
            success: true,
            stage: None,
            lookup_output: Some(lookup_output),
            issue_output: Some(issue_output),
            error: None,
            detail: None,
            error_kind: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::failed(ErrorKind::InvalidRequest, reason.into(), None)
    }

    pub fn config_missing(message: impl Into<String>) -> Self {
        Self::failed(ErrorKind::ConfigurationMissing, message.into(), None)
    }

    /// A stage failure, keeping whatever lookup output was already obtained.
    pub fn stage_failed(
        stage: Stage,
        kind: ErrorKind,
        detail: Option<String>,
        lookup_output: Option<String>,
    ) -> Self {
        let error = match kind {
            ErrorKind::StepLimitExceeded => {
                format!("{} agent gave no final answer within its step budget.", stage.label())
            }
            _ => format!("{} agent execution failed.", stage.label()),
        };
        Self {
            stage: Some(stage),
            lookup_output,
            ..Self::failed(kind, error, detail)
        }
    }

    fn failed(kind: ErrorKind, error: String, detail: Option<String>) -> Self {
        Self {
            success: false,
            stage: None,
            lookup_output: None,
            issue_output: None,
            error: Some(error),
            detail,
            error_kind: Some(kind),
        }
    }
}
