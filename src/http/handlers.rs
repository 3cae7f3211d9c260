use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use super::AppState;
use super::validate::validate;

/// ANY /api/submit
pub async fn submit_handler(
    State(state): State<AppState>,
    method: Method,
    body: Bytes,
) -> Response {
    let request = match validate(&method, &body) {
        Ok(request) => request,
        Err(rejection) => {
            log::info!("{method} /api/submit rejected: {}", rejection.reason());
            return rejection.into_response();
        }
    };

    state.orchestrator.handle(&request).await.into_response()
}

/// GET /health
pub async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
