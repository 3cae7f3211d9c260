//! HTTP surface: `/api/submit` in front of the pipeline, plus `/health`.

mod handlers;
mod response;
mod validate;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{any, get};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

use crate::pipeline::PipelineOrchestrator;

pub use response::status_for;
pub use validate::{METHOD_NOT_ALLOWED, Rejection, validate};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: PipelineOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/submit", any(handlers::submit_handler))
        .route("/health", get(handlers::health_handler))
        .with_state(state)
}

/// Serve until Ctrl-C, letting in-flight requests finish.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    log::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        log::error!("failed to install Ctrl-C handler: {err}");
        return;
    }
    log::info!("Ctrl-C received, shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, StageResult, StageRunner};
    use crate::config::{AppConfig, Secrets, Settings};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl StageRunner for Echo {
        async fn run(&self, _instruction: &str, config: &AgentConfig) -> StageResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let server = config
                .tool_servers()
                .next()
                .map(|s| s.name.to_string())
                .unwrap_or_default();
            StageResult::text(format!("done by {server}"))
        }
    }

    fn app(secrets: Secrets) -> (Router, Arc<Echo>) {
        let runner = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let settings = Arc::new(Settings::new(secrets, AppConfig::default()));
        let state = AppState::new(PipelineOrchestrator::new(settings, runner.clone()));
        (router(state), runner)
    }

    fn all_secrets() -> Secrets {
        Secrets::default()
            .with_anthropic_api_key("sk-ant")
            .with_supabase_access_token("sbp_x")
            .with_github_token("ghp_x")
    }

    async fn send(router: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn submit_runs_both_stages() {
        let (router, runner) = app(all_secrets());
        let (status, body) = send(
            router,
            "POST",
            "/api/submit",
            r#"{"email":"jane@example.com","problemDescription":"cart empty"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "success": true,
                "lookupOutput": "done by data-store",
                "issueOutput": "done by issue-tracker"
            })
        );
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn get_on_submit_is_405() {
        let (router, runner) = app(all_secrets());
        let (status, body) = send(router, "GET", "/api/submit", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"], METHOD_NOT_ALLOWED);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_field_is_400_and_runs_nothing() {
        let (router, runner) = app(all_secrets());
        let (status, body) =
            send(router, "POST", "/api/submit", r#"{"email":"jane@example.com"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "problemDescription is required.");
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_secrets_is_500_listing_every_name() {
        let (router, runner) = app(Secrets::default().with_anthropic_api_key("sk-ant"));
        let (status, body) = send(
            router,
            "POST",
            "/api/submit",
            r#"{"email":"jane@example.com","problemDescription":"cart empty"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error = body["error"].as_str().unwrap();
        assert!(error.contains("SUPABASE_ACCESS_TOKEN"));
        assert!(error.contains("GITHUB_PERSONAL_ACCESS_TOKEN"));
        assert!(body.get("stage").is_none());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (router, _) = app(Secrets::default());
        let (status, body) = send(router, "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }
}
