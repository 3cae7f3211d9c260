use anyhow::{Result, anyhow};
use colored::*;
use std::sync::Arc;

use relayrs::http::{self, AppState};
use relayrs::tool_server::{self, ExternalSystem};
use relayrs::{AgentRunner, PipelineOrchestrator, PipelineRequest, PipelineResponse, Settings};

mod args;
use args::Command;

#[tokio::main]
async fn main() -> Result<()> {
    relayrs::logging::init_logging();

    let command = Command::parse()?;
    let settings = Arc::new(Settings::load()?);

    match command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.app.server.bind.clone());
            println!(
                "{} {} | {} | {}",
                ">>".bold(),
                "relayrs".bold(),
                settings.app.model.id.as_str().cyan(),
                format!("http://{bind}").dimmed()
            );
            http::serve(AppState::new(orchestrator(&settings)), &bind).await
        }
        Command::Submit {
            email,
            problem,
            json_output,
        } => {
            let response = orchestrator(&settings)
                .handle(&PipelineRequest::new(email, problem))
                .await;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_summary(&response);
            }
            if response.success {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
        Command::Check { systems } => check(&settings, &systems),
    }
}

fn orchestrator(settings: &Arc<Settings>) -> PipelineOrchestrator {
    let runner = AgentRunner::from_settings(settings);
    PipelineOrchestrator::new(Arc::clone(settings), Arc::new(runner))
}

fn check(settings: &Settings, names: &[String]) -> Result<()> {
    let systems = if names.is_empty() {
        vec![ExternalSystem::DataStore, ExternalSystem::IssueTracker]
    } else {
        names
            .iter()
            .map(|n| ExternalSystem::parse(n).ok_or_else(|| anyhow!("Unknown system: {n}")))
            .collect::<Result<Vec<_>>>()?
    };

    for system in &systems {
        match tool_server::compose(*system, settings) {
            Ok(config) => println!(
                "{} {} {}",
                "✓".green().bold(),
                system.server_name().bold(),
                config.display_command().dimmed()
            ),
            Err(e) => println!("{} {} {}", "✗".red().bold(), system.server_name().bold(), e),
        }
    }

    tool_server::preflight(&systems, settings)?;
    Ok(())
}

fn print_summary(response: &PipelineResponse) {
    if response.success {
        println!("{} {}", "●".green().bold(), "Issue filed".bold());
    } else {
        let stage = response
            .stage
            .map(|s| format!(" ({s} stage)"))
            .unwrap_or_default();
        println!(
            "{} {}{}",
            "✗".red().bold(),
            response.error.as_deref().unwrap_or("Pipeline failed").red(),
            stage.dimmed()
        );
        if let Some(detail) = &response.detail {
            println!("  {}", detail.dimmed());
        }
    }

    if let Some(lookup) = &response.lookup_output {
        println!("\n{}\n{lookup}", "Lookup".cyan().bold());
    }
    if let Some(issue) = &response.issue_output {
        println!("\n{}\n{issue}", "Issue".cyan().bold());
    }
}
