//! Two-stage problem-report pipeline: account lookup, then issue filing.

pub mod prompts;
mod types;

use std::sync::Arc;
use uuid::Uuid;

use crate::agent::{AgentConfig, StageResult, StageRunner};
use crate::config::Settings;
use crate::errors::{ConfigError, ErrorKind};
use crate::extract::{extract, text_of};
use crate::tool_server::{self, ExternalSystem};
use crate::trace::RunScope;

pub use types::{PipelineRequest, PipelineResponse, Stage};

/// Configs for both stages, composed before anything runs.
struct StagePlan {
    lookup: AgentConfig,
    issue: AgentConfig,
}

enum State {
    ValidatingInput,
    RunningLookup(StagePlan),
    ExtractingContext {
        result: StageResult,
        issue: AgentConfig,
    },
    RunningIssueCreation {
        context: String,
        issue: AgentConfig,
    },
    Done(PipelineResponse),
}

pub struct PipelineOrchestrator {
    settings: Arc<Settings>,
    runner: Arc<dyn StageRunner>,
}

impl PipelineOrchestrator {
    pub fn new(settings: Arc<Settings>, runner: Arc<dyn StageRunner>) -> Self {
        Self { settings, runner }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one report through both stages. Never fails; every outcome is a
    /// [`PipelineResponse`].
    pub async fn handle(&self, request: &PipelineRequest) -> PipelineResponse {
        let request_id = Uuid::new_v4().to_string();
        let mut state = State::ValidatingInput;

        loop {
            state = match state {
                State::ValidatingInput => self.validate(&request_id, request),
                State::RunningLookup(plan) => self.run_lookup(&request_id, request, plan).await,
                State::ExtractingContext { result, issue } => {
                    let context = extract(&result);
                    log::debug!("[{request_id}] extracted {} chars of context", context.len());
                    State::RunningIssueCreation { context, issue }
                }
                State::RunningIssueCreation { context, issue } => {
                    self.run_issue(&request_id, request, context, issue).await
                }
                State::Done(response) => {
                    log_outcome(&request_id, &response);
                    return response;
                }
            };
        }
    }

    fn validate(&self, request_id: &str, request: &PipelineRequest) -> State {
        if let Some(field) = request.blank_field() {
            log::info!("[{request_id}] rejected: {field} is empty");
            return State::Done(PipelineResponse::invalid(format!("{field} is required")));
        }

        match self.plan(request_id) {
            Ok(plan) => State::RunningLookup(plan),
            Err(err) => {
                log::error!("[{request_id}] {err}");
                State::Done(PipelineResponse::config_missing(err.to_string()))
            }
        }
    }

    /// Check every secret both stages need, then build their configs.
    fn plan(&self, request_id: &str) -> Result<StagePlan, ConfigError> {
        let settings = self.settings.as_ref();
        tool_server::preflight(
            &[ExternalSystem::DataStore, ExternalSystem::IssueTracker],
            settings,
        )?;

        let lookup = AgentConfig::from_settings(settings, settings.app.lookup.max_steps)?
            .with_tool_server(tool_server::compose(ExternalSystem::DataStore, settings)?)?
            .deny_tools(ExternalSystem::DataStore.denied_tools(settings))
            .with_scope(scope(request_id, Stage::Lookup));

        let issue = AgentConfig::from_settings(settings, settings.app.issue.max_steps)?
            .with_tool_server(tool_server::compose(ExternalSystem::IssueTracker, settings)?)?
            .deny_tools(ExternalSystem::IssueTracker.denied_tools(settings))
            .with_scope(scope(request_id, Stage::Issue));

        Ok(StagePlan { lookup, issue })
    }

    async fn run_lookup(
        &self,
        request_id: &str,
        request: &PipelineRequest,
        plan: StagePlan,
    ) -> State {
        log::info!("[{request_id}] lookup stage started");
        let instruction = prompts::lookup_instruction(&request.email, &request.problem_description);
        log::debug!("[{request_id}] lookup instruction:\n{instruction}");

        match self.runner.run(&instruction, &plan.lookup).await {
            StageResult::Failure { kind, detail } => State::Done(PipelineResponse::stage_failed(
                Stage::Lookup,
                kind,
                detail,
                None,
            )),
            result => State::ExtractingContext {
                result,
                issue: plan.issue,
            },
        }
    }

    async fn run_issue(
        &self,
        request_id: &str,
        request: &PipelineRequest,
        context: String,
        issue: AgentConfig,
    ) -> State {
        log::info!("[{request_id}] issue stage started");
        let repository = &self.settings.app.issue_tracker.repository;
        let instruction = prompts::issue_instruction(&context, &request.email, repository);
        log::debug!("[{request_id}] issue instruction:\n{instruction}");

        let response = match self.runner.run(&instruction, &issue).await {
            StageResult::Failure { kind, detail } => {
                PipelineResponse::stage_failed(Stage::Issue, kind, detail, Some(context))
            }
            result => match text_of(&result) {
                Some(text) => PipelineResponse::succeeded(context, text),
                None => PipelineResponse::stage_failed(
                    Stage::Issue,
                    ErrorKind::AgentExecutionFailed,
                    Some("issue agent returned no text answer".to_string()),
                    Some(context),
                ),
            },
        };
        State::Done(response)
    }
}

fn scope(request_id: &str, stage: Stage) -> RunScope {
    RunScope {
        request_id: request_id.to_string(),
        stage: stage.as_str(),
    }
}

fn log_outcome(request_id: &str, response: &PipelineResponse) {
    if response.success {
        log::info!("[{request_id}] pipeline succeeded");
        return;
    }
    let kind = response.error_kind.map(ErrorKind::as_str).unwrap_or("unknown");
    match response.stage {
        Some(stage) => log::warn!("[{request_id}] {stage} stage failed ({kind})"),
        None => log::warn!("[{request_id}] pipeline rejected ({kind})"),
    }
}
